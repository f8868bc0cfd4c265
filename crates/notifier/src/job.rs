//! Job model helpers
//!
//! `JobEvent` is the closed set of callbacks the watcher adapter produces, and
//! `JobExt` gives typed access to the parts of a batch/v1 Job the notifier reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

/// Kubernetes applies this when `spec.backoffLimit` is unset.
pub const DEFAULT_BACKOFF_LIMIT: i32 = 6;

pub const CRON_JOB_KIND: &str = "CronJob";

/// A Job callback from the watch layer.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Added(Job),
    Updated { old: Job, new: Job },
    Deleted(Job),
}

impl JobEvent {
    /// The object the event refers to (the new one for updates).
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Added(job) | JobEvent::Deleted(job) => job,
            JobEvent::Updated { new, .. } => new,
        }
    }
}

pub trait JobExt {
    /// `namespace/name`, the key notification state is tracked under.
    fn key(&self) -> String;
    fn uid_or_default(&self) -> String;
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn succeeded(&self) -> i32;
    fn failed(&self) -> i32;
    fn start_time(&self) -> Option<DateTime<Utc>>;
    fn completion_time(&self) -> Option<DateTime<Utc>>;
    fn backoff_limit(&self) -> i32;
    /// Annotations of the pod template, where notification settings live.
    fn template_annotations(&self) -> BTreeMap<String, String>;
    fn cron_job_owner(&self) -> Option<&OwnerReference>;
}

impl JobExt for Job {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    fn uid_or_default(&self) -> String {
        self.uid().unwrap_or_default()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    fn succeeded(&self) -> i32 {
        self.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0)
    }

    fn failed(&self) -> i32 {
        self.status.as_ref().and_then(|s| s.failed).unwrap_or(0)
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.status
            .as_ref()
            .and_then(|s| s.start_time.as_ref())
            .map(|t| t.0)
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.status
            .as_ref()
            .and_then(|s| s.completion_time.as_ref())
            .map(|t| t.0)
    }

    fn backoff_limit(&self) -> i32 {
        self.spec
            .as_ref()
            .and_then(|s| s.backoff_limit)
            .unwrap_or(DEFAULT_BACKOFF_LIMIT)
    }

    fn template_annotations(&self) -> BTreeMap<String, String> {
        self.spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default()
    }

    fn cron_job_owner(&self) -> Option<&OwnerReference> {
        self.metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.kind == CRON_JOB_KIND))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::JobBuilder;
    use super::*;

    #[test]
    fn test_defaults_for_sparse_job() {
        let job = Job::default();
        assert_eq!(job.succeeded(), 0);
        assert_eq!(job.failed(), 0);
        assert_eq!(job.backoff_limit(), DEFAULT_BACKOFF_LIMIT);
        assert!(job.template_annotations().is_empty());
        assert!(job.cron_job_owner().is_none());
        assert_eq!(job.key(), "/");
    }

    #[test]
    fn test_cron_job_owner_ignores_other_kinds() {
        let mut job = JobBuilder::new("report-1").build();
        job.metadata.owner_references = Some(vec![OwnerReference {
            kind: "Workflow".to_string(),
            name: "wf".to_string(),
            ..Default::default()
        }]);
        assert!(job.cron_job_owner().is_none());

        let job = JobBuilder::new("report-2").owned_by_cron_job("report").build();
        assert_eq!(job.cron_job_owner().map(|o| o.name.as_str()), Some("report"));
    }

    #[test]
    fn test_template_annotations_and_key() {
        let job = JobBuilder::new("backup")
            .annotation("kube-job-notifier/log-mode", "PodOnly")
            .build();
        assert_eq!(job.key(), "default/backup");
        assert_eq!(
            job.template_annotations().get("kube-job-notifier/log-mode").map(String::as_str),
            Some("PodOnly")
        );
    }
}
