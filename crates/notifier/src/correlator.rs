//! Correlates a Job with the pods it ran and the CronJob that owns it.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::job::JobExt;
use crate::kubernetes::{ClusterApi, CronJobVersion, CONTROLLER_UID_LABEL, JOB_NAME_LABEL, POD_PHASE_PENDING};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct PodWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for PodWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

#[derive(Clone)]
pub struct Correlator {
    api: Arc<dyn ClusterApi>,
}

impl Correlator {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    fn uid_selector(job: &Job) -> String {
        format!("{}={}", CONTROLLER_UID_LABEL, job.uid_or_default())
    }

    /// The most recently created pod of `job`. Tries the uid label first and
    /// falls back to the legacy job-name label.
    pub async fn resolve_pod(&self, job: &Job) -> Result<Pod> {
        let namespace = job.namespace().unwrap_or_default();

        let mut pods = self.api.list_pods(&namespace, &Self::uid_selector(job)).await?;
        if pods.is_empty() {
            let legacy = format!("{}={}", JOB_NAME_LABEL, job.name_any());
            debug!(job = %job.key(), selector = %legacy, "No pods by uid, trying legacy label");
            pods = self.api.list_pods(&namespace, &legacy).await?;
        }

        pods.into_iter()
            .max_by_key(|p| p.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .ok_or_else(|| Error::NotFound(format!("no pods for job {}", job.key())))
    }

    /// Name of the owning CronJob, `None` for standalone Jobs.
    pub async fn resolve_parent_schedule(&self, job: &Job) -> Result<Option<String>> {
        let Some(owner) = job.cron_job_owner() else {
            return Ok(None);
        };
        let namespace = job.namespace().unwrap_or_default();

        let mut last_error = None;
        for version in CronJobVersion::LOOKUP_ORDER {
            match self.api.get_cron_job(&namespace, &owner.name, version).await {
                Ok(name) => return Ok(Some(name)),
                Err(e) => {
                    debug!(
                        job = %job.key(),
                        api_version = version.api_version(),
                        error = %e,
                        "CronJob lookup failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NotFound(owner.name.clone())))
    }

    /// True once the job cannot produce another attempt: it succeeded, or at
    /// least `backoffLimit + 1` pods exist. Evicted pods can push the count
    /// past that ceiling. A failed pod listing also counts as complete so
    /// tracked state cannot grow without bound.
    pub async fn is_job_complete(&self, job: &Job) -> bool {
        if job.succeeded() >= 1 {
            return true;
        }

        let namespace = job.namespace().unwrap_or_default();
        match self.api.list_pods(&namespace, &Self::uid_selector(job)).await {
            Ok(pods) => {
                let ceiling = i64::from(job.backoff_limit()) + 1;
                pods.len() as i64 >= ceiling
            }
            Err(e) => {
                warn!(job = %job.key(), error = %e, "Pod listing failed, treating job as complete");
                true
            }
        }
    }

    /// Polls `pod` until it leaves the Pending phase.
    pub async fn wait_for_pod_running(
        &self,
        pod: &Pod,
        clock: &dyn Clock,
        wait: PodWait,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let deadline = clock.now()
            + chrono::Duration::from_std(wait.timeout)
                .map_err(|e| Error::Config(format!("pod wait timeout out of range: {}", e)))?;

        loop {
            if clock.now() > deadline {
                return Err(Error::Timeout(format!(
                    "pod {}/{} still pending after {:?}",
                    namespace, name, wait.timeout
                )));
            }

            let current = self.api.get_pod(&namespace, &name).await?;
            let phase = current.status.as_ref().and_then(|s| s.phase.as_deref());
            if phase != Some(POD_PHASE_PENDING) {
                return Ok(());
            }
            debug!(pod = %name, "Pod still pending");

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = clock.sleep(wait.poll_interval) => {}
            }
        }
    }
}
