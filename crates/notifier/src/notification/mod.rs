//! Chat-style notification backends.
//!
//! Every [`Notifier`] shares the channel resolution, suppression and
//! execution-time rules implemented here; the backends only differ in how a
//! rendered message is delivered.

mod msteams;
mod slack;

pub use msteams::MsTeamsV2;
pub use slack::{HttpSlackApi, Slack, SlackApi, SlackAttachment};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;

pub const DEFAULT_CHANNEL_ANNOTATION: &str = "kube-job-notifier/default-channel";
pub const SUCCESS_CHANNEL_ANNOTATION: &str = "kube-job-notifier/success-channel";
pub const STARTED_CHANNEL_ANNOTATION: &str = "kube-job-notifier/started-channel";
pub const FAILED_CHANNEL_ANNOTATION: &str = "kube-job-notifier/failed-channel";
pub const SUPPRESS_SUCCESS_ANNOTATION: &str = "kube-job-notifier/suppress-success-notification";
pub const SUPPRESS_STARTED_ANNOTATION: &str = "kube-job-notifier/suppress-started-notification";
pub const SUPPRESS_FAILED_ANNOTATION: &str = "kube-job-notifier/suppress-failed-notification";

/// Lifecycle transition a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Started,
    Succeeded,
    Failed,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Transition::Started)
    }

    pub fn channel_annotation(&self) -> &'static str {
        match self {
            Transition::Started => STARTED_CHANNEL_ANNOTATION,
            Transition::Succeeded => SUCCESS_CHANNEL_ANNOTATION,
            Transition::Failed => FAILED_CHANNEL_ANNOTATION,
        }
    }

    pub fn suppress_annotation(&self) -> &'static str {
        match self {
            Transition::Started => SUPPRESS_STARTED_ANNOTATION,
            Transition::Succeeded => SUPPRESS_SUCCESS_ANNOTATION,
            Transition::Failed => SUPPRESS_FAILED_ANNOTATION,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Started => write!(f, "started"),
            Transition::Succeeded => write!(f, "succeeded"),
            Transition::Failed => write!(f, "failed"),
        }
    }
}

/// Global per-transition switches of one backend (`*_STARTED_NOTIFY` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSwitches {
    pub started: bool,
    pub succeeded: bool,
    pub failed: bool,
}

impl Default for EventSwitches {
    fn default() -> Self {
        Self {
            started: true,
            succeeded: true,
            failed: true,
        }
    }
}

impl EventSwitches {
    pub fn enabled(&self, transition: Transition) -> bool {
        match transition {
            Transition::Started => self.started,
            Transition::Succeeded => self.succeeded,
            Transition::Failed => self.failed,
        }
    }
}

/// Everything a notifier needs to render one message.
#[derive(Debug, Clone, Default)]
pub struct MessageParam {
    pub job_name: String,
    pub cron_job_name: String,
    pub namespace: String,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub log: String,
    pub annotations: BTreeMap<String, String>,
    /// Wins over every other channel source when set.
    pub channel_override: Option<String>,
}

impl MessageParam {
    /// CronJob name when the job has one, otherwise the job name.
    pub fn display_name(&self) -> &str {
        if self.cron_job_name.is_empty() {
            &self.job_name
        } else {
            &self.cron_job_name
        }
    }

    /// Completion time (now when unknown) and the whole-second duration since
    /// start. Without a start time both are left empty.
    pub fn execution_time(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<chrono::Duration>) {
        let Some(start) = self.start_time else {
            return (self.completion_time, None);
        };
        let completion = self.completion_time.unwrap_or(now);
        let elapsed = chrono::Duration::seconds((completion - start).num_seconds());
        (Some(completion), Some(elapsed))
    }

    pub fn is_suppressed(&self, transition: Transition) -> bool {
        is_annotation_true(&self.annotations, transition.suppress_annotation())
    }

    /// Destination channel: explicit override, then the transition's
    /// annotation, then the default-channel annotation, then `fallback`.
    pub fn resolve_channel(&self, transition: Transition, fallback: &str) -> String {
        let non_empty = |v: Option<&String>| v.filter(|s| !s.is_empty()).cloned();

        self.channel_override
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| non_empty(self.annotations.get(transition.channel_annotation())))
            .or_else(|| non_empty(self.annotations.get(DEFAULT_CHANNEL_ANNOTATION)))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Flattened view used by the message templates.
    pub fn template_fields(&self, now: DateTime<Utc>, time_format: &str) -> TemplateFields {
        let (completion, elapsed) = self.execution_time(now);
        TemplateFields {
            cron_job_name: self.cron_job_name.clone(),
            job_name: self.job_name.clone(),
            namespace: self.namespace.clone(),
            start_time: self
                .start_time
                .map(|t| t.format(time_format).to_string())
                .unwrap_or_default(),
            completion_time: completion
                .map(|t| t.format(time_format).to_string())
                .unwrap_or_default(),
            execution_time: elapsed
                .filter(|d| d.num_seconds() != 0)
                .map(format_duration)
                .unwrap_or_default(),
            log: self.log.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateFields {
    pub cron_job_name: String,
    pub job_name: String,
    pub namespace: String,
    pub start_time: String,
    pub completion_time: String,
    pub execution_time: String,
    pub log: String,
}

/// Formats a duration as `1h2m3s`, dropping leading zero units (`1m1s`, `45s`).
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}{}m{}s", sign, minutes, seconds)
    } else {
        format!("{}{}s", sign, seconds)
    }
}

pub(crate) fn is_annotation_true(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).map(|v| v == "true").unwrap_or(false)
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_start(&self, param: &MessageParam) -> Result<()>;
    async fn notify_success(&self, param: &MessageParam) -> Result<()>;
    async fn notify_failed(&self, param: &MessageParam) -> Result<()>;
}

/// Dispatches a transition to the matching [`Notifier`] method.
pub async fn notify(notifier: &dyn Notifier, transition: Transition, param: &MessageParam) -> Result<()> {
    match transition {
        Transition::Started => notifier.notify_start(param).await,
        Transition::Succeeded => notifier.notify_success(param).await,
        Transition::Failed => notifier.notify_failed(param).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn param_with(annotations: &[(&str, &str)]) -> MessageParam {
        MessageParam {
            job_name: "backup-123".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_channel_resolution_precedence() {
        let param = param_with(&[
            (SUCCESS_CHANNEL_ANNOTATION, "A"),
            (DEFAULT_CHANNEL_ANNOTATION, "B"),
        ]);
        assert_eq!(param.resolve_channel(Transition::Succeeded, "static"), "A");
        // Only the success annotation is set; failures use the default annotation.
        assert_eq!(param.resolve_channel(Transition::Failed, "static"), "B");

        let param = param_with(&[(DEFAULT_CHANNEL_ANNOTATION, "B")]);
        assert_eq!(param.resolve_channel(Transition::Succeeded, "static"), "B");

        let param = param_with(&[]);
        assert_eq!(param.resolve_channel(Transition::Succeeded, "static"), "static");

        let mut param = param_with(&[(SUCCESS_CHANNEL_ANNOTATION, "A")]);
        param.channel_override = Some("override".to_string());
        assert_eq!(param.resolve_channel(Transition::Succeeded, "static"), "override");
    }

    #[test]
    fn test_empty_channel_annotation_is_ignored() {
        let param = param_with(&[(STARTED_CHANNEL_ANNOTATION, ""), (DEFAULT_CHANNEL_ANNOTATION, "B")]);
        assert_eq!(param.resolve_channel(Transition::Started, "static"), "B");
    }

    #[test]
    fn test_suppression_requires_literal_true() {
        assert!(param_with(&[(SUPPRESS_SUCCESS_ANNOTATION, "true")]).is_suppressed(Transition::Succeeded));
        assert!(!param_with(&[(SUPPRESS_SUCCESS_ANNOTATION, "false")]).is_suppressed(Transition::Succeeded));
        assert!(!param_with(&[(SUPPRESS_SUCCESS_ANNOTATION, "true")]).is_suppressed(Transition::Failed));
        assert!(!param_with(&[]).is_suppressed(Transition::Started));
    }

    #[test]
    fn test_execution_time_with_completion() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        let param = MessageParam {
            start_time: Some(start),
            completion_time: Some(start + Duration::seconds(61) + Duration::milliseconds(900)),
            ..Default::default()
        };

        let (_, elapsed) = param.execution_time(Utc::now());
        assert_eq!(elapsed.map(format_duration).as_deref(), Some("1m1s"));
    }

    #[test]
    fn test_execution_time_defaults_completion_to_now() {
        let now = Utc::now();
        let param = MessageParam {
            start_time: Some(now - Duration::seconds(90)),
            ..Default::default()
        };

        let (completion, elapsed) = param.execution_time(now);
        assert_eq!(completion, Some(now));
        let elapsed = elapsed.unwrap();
        assert!(elapsed > Duration::zero());
        assert_eq!(format_duration(elapsed), "1m30s");
    }

    #[test]
    fn test_execution_time_without_start() {
        let (completion, elapsed) = MessageParam::default().execution_time(Utc::now());
        assert!(completion.is_none());
        assert!(elapsed.is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::zero()), "0s");
        assert_eq!(format_duration(Duration::seconds(45)), "45s");
        assert_eq!(format_duration(Duration::seconds(3605)), "1h0m5s");
        assert_eq!(format_duration(Duration::seconds(-61)), "-1m1s");
    }

    #[test]
    fn test_display_name() {
        let mut param = MessageParam {
            job_name: "nightly-backup-28391".to_string(),
            ..Default::default()
        };
        assert_eq!(param.display_name(), "nightly-backup-28391");
        param.cron_job_name = "nightly-backup".to_string();
        assert_eq!(param.display_name(), "nightly-backup");
    }

    #[test]
    fn test_event_switches() {
        let switches = EventSwitches {
            started: false,
            ..Default::default()
        };
        assert!(!switches.enabled(Transition::Started));
        assert!(switches.enabled(Transition::Succeeded));
        assert!(Transition::Failed.is_terminal());
        assert!(!Transition::Started.is_terminal());
    }
}
