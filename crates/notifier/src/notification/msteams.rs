use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::{EventSwitches, MessageParam, Notifier, Transition};
use crate::config::MsTeamsConfig;
use crate::template::render_template;
use crate::{Error, Result};

const TEAMS_MESSAGE_TEMPLATE: &str = r#"
{% if cron_job_name %}**CronJobName**: {{ cron_job_name }}{% endif %}
**JobName**: {{ job_name }}
{% if namespace %}**Namespace**: {{ namespace }}{% endif %}
{% if start_time %}**StartTime**: {{ start_time }}{% endif %}
{% if completion_time %}**CompletionTime**: {{ completion_time }}{% endif %}
{% if execution_time %}**ExecutionTime**: {{ execution_time }}{% endif %}"#;

const TEAMS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

const COLOR_RED: &str = "Attention";
const COLOR_GREEN: &str = "Good";
const COLOR_GREY: &str = "Warning";

// Adaptive card payload accepted by Teams workflow webhooks.
#[derive(Debug, Serialize)]
pub struct TeamsMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub attachments: Vec<TeamsAttachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsAttachment {
    pub content_type: String,
    pub content_url: Option<String>,
    pub content: CardContent,
}

#[derive(Debug, Serialize)]
pub struct CardContent {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub version: String,
    pub body: Vec<TextBlock>,
    pub msteams: CardWidth,
}

#[derive(Debug, Serialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub wrap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CardWidth {
    pub width: String,
}

pub struct MsTeamsV2 {
    client: reqwest::Client,
    webhook_url: String,
    switches: EventSwitches,
}

impl MsTeamsV2 {
    pub fn new(config: &MsTeamsConfig, timeout: Duration) -> Result<Self> {
        if config.webhook_url.is_empty() {
            return Err(Error::Config(
                "MSTEAMSV2_WEBHOOK_URL must be set when Teams is enabled".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            webhook_url: config.webhook_url.clone(),
            switches: config.switches,
        })
    }

    /// Builds the card; single line breaks are doubled because adaptive cards
    /// collapse them.
    pub fn payload(title: &str, text: &str, color: &str) -> TeamsMessage {
        TeamsMessage {
            message_type: "message".to_string(),
            attachments: vec![TeamsAttachment {
                content_type: "application/vnd.microsoft.card.adaptive".to_string(),
                content_url: None,
                content: CardContent {
                    schema: "http://adaptivecards.io/schemas/adaptive-card.json".to_string(),
                    card_type: "AdaptiveCard".to_string(),
                    version: "1.4".to_string(),
                    body: vec![
                        TextBlock {
                            block_type: "TextBlock".to_string(),
                            text: title.to_string(),
                            weight: Some("Bolder".to_string()),
                            size: Some("Medium".to_string()),
                            wrap: true,
                            style: Some("heading".to_string()),
                            color: Some(color.to_string()),
                        },
                        TextBlock {
                            block_type: "TextBlock".to_string(),
                            text: text.replace('\n', "\n\n"),
                            weight: None,
                            size: None,
                            wrap: true,
                            style: None,
                            color: None,
                        },
                    ],
                    msteams: CardWidth {
                        width: "full".to_string(),
                    },
                },
            }],
        }
    }

    async fn send(&self, transition: Transition, param: &MessageParam) -> Result<()> {
        if !self.switches.enabled(transition) {
            debug!(job = %param.job_name, %transition, "Teams notification disabled");
            return Ok(());
        }
        if param.is_suppressed(transition) {
            info!(job = %param.job_name, %transition, "Notification for job is suppressed");
            return Ok(());
        }

        let mut fields = param.template_fields(Utc::now(), TEAMS_TIME_FORMAT);
        if !transition.is_terminal() {
            fields.completion_time.clear();
            fields.execution_time.clear();
        }
        let text = render_template(TEAMS_MESSAGE_TEMPLATE, &fields)?;

        let (title, color) = match transition {
            Transition::Started => ("Job Start", COLOR_GREY),
            Transition::Succeeded => ("Job Succeeded", COLOR_GREEN),
            Transition::Failed => ("Job Failed", COLOR_RED),
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(title, &text, color))
            .send()
            .await?;
        let status = response.status();
        info!(job = %param.job_name, %status, "Teams webhook responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "Teams webhook failed: status={} body={}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MsTeamsV2 {
    async fn notify_start(&self, param: &MessageParam) -> Result<()> {
        self.send(Transition::Started, param).await
    }

    async fn notify_success(&self, param: &MessageParam) -> Result<()> {
        self.send(Transition::Succeeded, param).await
    }

    async fn notify_failed(&self, param: &MessageParam) -> Result<()> {
        self.send(Transition::Failed, param).await
    }
}
