use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{EventSwitches, MessageParam, Notifier, Transition};
use crate::config::SlackConfig;
use crate::template::render_template;
use crate::{Error, Result};

const SLACK_MESSAGE_TEMPLATE: &str = r#"
{% if cron_job_name %} *CronJobName*: {{ cron_job_name }}{% endif %}
 *JobName*: {{ job_name }}
{% if namespace %} *Namespace*: {{ namespace }}{% endif %}
{% if start_time %} *StartTime*: {{ start_time }}{% endif %}
{% if completion_time %} *CompletionTime*: {{ completion_time }}{% endif %}
{% if execution_time %} *ExecutionTime*: {{ execution_time }}{% endif %}
{% if log %} *Loglink*: {{ log }}{% endif %}"#;

const SLACK_TIME_FORMAT: &str = "%Y/%-m/%-d %H:%M:%S UTC";

const COLOR_GOOD: &str = "good";
const COLOR_DANGER: &str = "danger";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlackAttachment {
    pub color: String,
    pub title: String,
    pub text: String,
}

/// The two Slack Web API operations the notifier uses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, channel: &str, attachment: &SlackAttachment) -> Result<()>;

    /// Uploads `content` as a file shared into `channel` and returns its permalink.
    async fn upload_log(&self, channel: &str, title: &str, content: &str) -> Result<String>;
}

pub struct Slack {
    api: Arc<dyn SlackApi>,
    channel: String,
    succeed_channel: String,
    failed_channel: String,
    switches: EventSwitches,
}

impl Slack {
    pub fn new(api: Arc<dyn SlackApi>, config: &SlackConfig) -> Self {
        Self {
            api,
            channel: config.channel.clone(),
            succeed_channel: config.succeed_channel.clone(),
            failed_channel: config.failed_channel.clone(),
            switches: config.switches,
        }
    }

    fn static_channel(&self, transition: Transition) -> &str {
        let preferred = match transition {
            Transition::Started | Transition::Succeeded => &self.succeed_channel,
            Transition::Failed => &self.failed_channel,
        };
        if preferred.is_empty() {
            &self.channel
        } else {
            preferred
        }
    }

    async fn send(&self, transition: Transition, param: &MessageParam) -> Result<()> {
        if !self.switches.enabled(transition) {
            debug!(job = %param.job_name, %transition, "Slack notification disabled");
            return Ok(());
        }
        if param.is_suppressed(transition) {
            info!(job = %param.job_name, %transition, "Notification for job is suppressed");
            return Ok(());
        }

        let channel = param.resolve_channel(transition, self.static_channel(transition));

        let mut fields = param.template_fields(Utc::now(), SLACK_TIME_FORMAT);
        if transition.is_terminal() {
            if !param.log.is_empty() {
                let title = format!("{}_{}", param.namespace, param.job_name);
                fields.log = self.api.upload_log(&channel, &title, &param.log).await?;
            }
        } else {
            fields.completion_time.clear();
            fields.execution_time.clear();
            fields.log.clear();
        }

        let (title, color) = match transition {
            Transition::Started => ("Job Start", COLOR_GOOD),
            Transition::Succeeded => ("Job Success", COLOR_GOOD),
            Transition::Failed => ("Job Failed", COLOR_DANGER),
        };
        let attachment = SlackAttachment {
            color: color.to_string(),
            title: title.to_string(),
            text: render_template(SLACK_MESSAGE_TEMPLATE, &fields)?,
        };

        self.api.post_message(&channel, &attachment).await?;
        info!(job = %param.job_name, %channel, %transition, "Slack message sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for Slack {
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

/// [`SlackApi`] over the Slack Web API.
pub struct HttpSlackApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    files: Vec<SlackFile>,
}

#[derive(Debug, Deserialize)]
struct SlackFile {
    #[serde(default)]
    permalink: String,
}

impl SlackResponse {
    fn into_result(self, method: &str) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::Delivery(format!(
                "{} error: {}",
                method,
                self.error.as_deref().unwrap_or("unknown")
            )))
        }
    }
}

impl HttpSlackApi {
    pub fn new(config: &SlackConfig, timeout: Duration) -> Result<Self> {
        if config.token.is_empty() {
            return Err(Error::Config("SLACK_TOKEN must be set when Slack is enabled".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            username: config.username.clone(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn read(response: reqwest::Response, method: &str) -> Result<SlackResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "{} failed: status={} body={}",
                method, status, body
            )));
        }
        response.json::<SlackResponse>().await?.into_result(method)
    }
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn post_message(&self, channel: &str, attachment: &SlackAttachment) -> Result<()> {
        let body = json!({
            "channel": channel,
            "text": "",
            "username": self.username,
            "attachments": [attachment],
        });
        let response = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::read(response, "chat.postMessage").await?;
        Ok(())
    }

    async fn upload_log(&self, channel: &str, title: &str, content: &str) -> Result<String> {
        let filename = format!("{}.txt", title);

        let length = content.len().to_string();
        let response = self
            .client
            .post(self.url("files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .form(&[("filename", filename.as_str()), ("length", length.as_str())])
            .send()
            .await?;
        let ticket = Self::read(response, "files.getUploadURLExternal").await?;
        let (Some(upload_url), Some(file_id)) = (ticket.upload_url, ticket.file_id) else {
            return Err(Error::Delivery(
                "files.getUploadURLExternal returned no upload_url".to_string(),
            ));
        };

        let response = self
            .client
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(content.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Delivery(format!(
                "upload to upload_url failed: status={}",
                response.status()
            )));
        }

        let response = self
            .client
            .post(self.url("files.completeUploadExternal"))
            .bearer_auth(&self.token)
            .json(&json!({
                "channel_id": channel,
                "files": [{ "id": file_id, "title": filename }],
            }))
            .send()
            .await?;
        let completed = Self::read(response, "files.completeUploadExternal").await?;

        let file = completed.files.into_iter().next().ok_or_else(|| {
            Error::Delivery("files.completeUploadExternal returned no files".to_string())
        })?;
        info!(%filename, "Log uploaded to Slack");
        Ok(file.permalink)
    }
}
