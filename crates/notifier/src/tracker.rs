//! Job lifecycle state machine.
//!
//! A [`Tracker`] turns add/update/delete callbacks into at most one start and
//! one terminal notification per job. Notification state lives in memory only,
//! keyed by `namespace/name` and tagged with the job's uid so a recreated job
//! never inherits or loses the state of its predecessor.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::correlator::{Correlator, PodWait};
use crate::job::{JobEvent, JobExt};
use crate::kubernetes::ClusterApi;
use crate::logs::{LogCollector, LogMode};
use crate::metrics;
use crate::notification::{MessageParam, Transition};
use crate::router::NotificationRouter;

const DEFAULT_LOG_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Created before the tracker started.
    PreExisting,
    AlreadyNotified,
    /// Neither the succeeded flag nor the failed flag flipped.
    Unchanged,
    Filtered,
    NoTransition,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::PreExisting => "created before start",
            SkipReason::AlreadyNotified => "already notified",
            SkipReason::Unchanged => "status unchanged",
            SkipReason::Filtered => "filtered by CronJob regex",
            SkipReason::NoTransition => "no qualifying transition",
        };
        f.write_str(reason)
    }
}

/// Decision taken for one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Emitted(Transition),
    Skipped(SkipReason),
    Aborted(String),
    Forgotten,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Emitted(_) => "emitted",
            Outcome::Skipped(_) => "skipped",
            Outcome::Aborted(_) => "aborted",
            Outcome::Forgotten => "forgotten",
        }
    }
}

/// Notification state for one job incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedJob {
    uid: String,
    notified: bool,
}

pub struct Tracker {
    started_at: DateTime<Utc>,
    notified: Mutex<HashMap<String, TrackedJob>>,
    correlator: Correlator,
    logs: LogCollector,
    router: NotificationRouter,
    clock: Arc<dyn Clock>,
    cronjob_regex: Option<Regex>,
    pod_wait: PodWait,
    cancel: CancellationToken,
}

impl Tracker {
    /// Jobs created before `clock.now()` are never notified.
    pub fn new(
        api: Arc<dyn ClusterApi>,
        router: NotificationRouter,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            started_at: clock.now(),
            notified: Mutex::new(HashMap::new()),
            correlator: Correlator::new(api.clone()),
            logs: LogCollector::new(api, DEFAULT_LOG_FETCH_TIMEOUT),
            router,
            clock,
            cronjob_regex: None,
            pod_wait: PodWait::default(),
            cancel,
        }
    }

    pub fn with_cronjob_filter(mut self, regex: Option<Regex>) -> Self {
        self.cronjob_regex = regex;
        self
    }

    pub fn with_pod_wait(mut self, wait: PodWait) -> Self {
        self.pod_wait = wait;
        self
    }

    pub fn with_log_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.logs = self.logs.with_timeout(timeout);
        self
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of jobs with notification state.
    pub fn tracked_jobs(&self) -> usize {
        self.state().len()
    }

    pub async fn handle(&self, event: JobEvent) -> Outcome {
        let outcome = match &event {
            JobEvent::Added(job) => self.on_added(job).await,
            JobEvent::Updated { old, new } => self.on_updated(old, new).await,
            JobEvent::Deleted(job) => self.on_deleted(job),
        };

        let job = event.job();
        match &outcome {
            Outcome::Emitted(transition) => info!(job = %job.key(), %transition, "Notification sent"),
            Outcome::Skipped(reason) => debug!(job = %job.key(), %reason, "Skipped"),
            Outcome::Aborted(reason) => warn!(job = %job.key(), %reason, "Notification aborted"),
            Outcome::Forgotten => debug!(job = %job.key(), "Forgot job"),
        }
        metrics::record_transition(outcome.label());
        metrics::TRACKED_JOBS.set(self.tracked_jobs() as i64);
        outcome
    }

    async fn on_added(&self, job: &Job) -> Outcome {
        if self.is_pre_existing(job) {
            return Outcome::Skipped(SkipReason::PreExisting);
        }
        if self.is_notified(job) {
            return Outcome::Skipped(SkipReason::AlreadyNotified);
        }

        let cron_job_name = self.parent_schedule(job).await;
        if !self.passes_filter(&cron_job_name) {
            return Outcome::Skipped(SkipReason::Filtered);
        }

        let pod = match self.correlator.resolve_pod(job).await {
            Ok(pod) => pod,
            Err(e) => return Outcome::Aborted(format!("pod lookup failed: {}", e)),
        };
        if let Err(e) = self
            .correlator
            .wait_for_pod_running(&pod, self.clock.as_ref(), self.pod_wait, &self.cancel)
            .await
        {
            return Outcome::Aborted(format!("pod {} never started: {}", pod.name_any(), e));
        }

        let param = message_param(job, cron_job_name, String::new());
        if self.router.dispatch(Transition::Started, &param, &self.cancel).await.cancelled {
            return Outcome::Aborted("shutdown during delivery".to_string());
        }
        let uid = job.uid_or_default();
        let mut state = self.state();
        if state.get(&job.key()).map_or(true, |tracked| tracked.uid != uid) {
            state.insert(job.key(), TrackedJob { uid, notified: false });
        }
        Outcome::Emitted(Transition::Started)
    }

    async fn on_updated(&self, old: &Job, new: &Job) -> Outcome {
        if self.is_pre_existing(new) {
            return Outcome::Skipped(SkipReason::PreExisting);
        }
        // Checked before any cluster call so duplicate updates stay cheap.
        if self.is_notified(new) {
            return Outcome::Skipped(SkipReason::AlreadyNotified);
        }
        let succeeded_flipped = (old.succeeded() > 0) != (new.succeeded() > 0);
        let failed_flipped = (old.failed() > 0) != (new.failed() > 0);
        if !succeeded_flipped && !failed_flipped {
            return Outcome::Skipped(SkipReason::Unchanged);
        }

        let cron_job_name = self.parent_schedule(new).await;
        if !self.passes_filter(&cron_job_name) {
            return Outcome::Skipped(SkipReason::Filtered);
        }

        let transition = if new.succeeded() >= 1 && old.succeeded() == 0 {
            Transition::Succeeded
        } else if new.failed() >= 1 && old.failed() == 0 {
            Transition::Failed
        } else {
            return Outcome::Skipped(SkipReason::NoTransition);
        };

        let pod = match self.correlator.resolve_pod(new).await {
            Ok(pod) => pod,
            Err(e) => return Outcome::Aborted(format!("pod lookup failed: {}", e)),
        };

        let mode = LogMode::from_annotations(&new.template_annotations());
        let owner_container = if cron_job_name.is_empty() {
            new.name_any()
        } else {
            cron_job_name.clone()
        };
        let log = self.logs.collect(&pod, &owner_container, mode).await;

        let param = message_param(new, cron_job_name, log);
        if self.router.dispatch(transition, &param, &self.cancel).await.cancelled {
            return Outcome::Aborted("shutdown during delivery".to_string());
        }

        // A failure with retries left stays un-notified so a later success
        // is still reported.
        let complete = self.correlator.is_job_complete(new).await;
        self.state().insert(
            new.key(),
            TrackedJob {
                uid: new.uid_or_default(),
                notified: complete,
            },
        );
        Outcome::Emitted(transition)
    }

    fn on_deleted(&self, job: &Job) -> Outcome {
        let key = job.key();
        let mut state = self.state();
        // A late delete for an earlier job with the same name must not drop
        // the entry of its replacement.
        if state.get(&key).is_some_and(|tracked| tracked.uid == job.uid_or_default()) {
            state.remove(&key);
        }
        Outcome::Forgotten
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedJob>> {
        // A poisoned map is still consistent: every write is a single insert or remove.
        self.notified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_notified(&self, job: &Job) -> bool {
        self.state()
            .get(&job.key())
            .is_some_and(|tracked| tracked.notified && tracked.uid == job.uid_or_default())
    }

    fn is_pre_existing(&self, job: &Job) -> bool {
        job.created_at()
            .map(|created| created < self.started_at)
            .unwrap_or(true)
    }

    fn passes_filter(&self, cron_job_name: &str) -> bool {
        self.cronjob_regex
            .as_ref()
            .map(|re| re.is_match(cron_job_name))
            .unwrap_or(true)
    }

    async fn parent_schedule(&self, job: &Job) -> String {
        match self.correlator.resolve_parent_schedule(job).await {
            Ok(name) => name.unwrap_or_default(),
            Err(e) => {
                warn!(job = %job.key(), error = %e, "Could not resolve owning CronJob");
                String::new()
            }
        }
    }
}

fn message_param(job: &Job, cron_job_name: String, log: String) -> MessageParam {
    MessageParam {
        job_name: job.name_any(),
        cron_job_name,
        namespace: job.namespace().unwrap_or_default(),
        start_time: job.start_time(),
        completion_time: job.completion_time(),
        log,
        annotations: job.template_annotations(),
        channel_override: None,
    }
}
