//! Metrics/alerting backends that record job outcomes as events.

mod datadog;

pub use datadog::{Datadog, DogStatsdSocket, StatsdSink};

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::Result;

/// Minimal identity of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub cron_job_name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
}

impl JobInfo {
    /// CronJob name when set, otherwise the job name. Failure and success
    /// events of the same logical job must agree on this for a backend to
    /// pair them as a recovery.
    pub fn display_name(&self) -> &str {
        if self.cron_job_name.is_empty() {
            &self.name
        } else {
            &self.cron_job_name
        }
    }
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn success_event(&self, job: &JobInfo) -> Result<()>;
    async fn fail_event(&self, job: &JobInfo) -> Result<()>;
}
