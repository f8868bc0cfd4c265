//! Best-effort log collection for terminal notifications.
//!
//! Fetch failures never abort a notification: the error text is returned in
//! place of the log body.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::warn;

use crate::kubernetes::ClusterApi;

pub const LOG_MODE_ANNOTATION: &str = "kube-job-notifier/log-mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Logs of the container named after the CronJob (or Job).
    #[default]
    OwnerContainer,
    /// Logs without a container filter; only valid for single-container pods.
    PodOnly,
    /// Every container, each under its own header.
    PodContainers,
}

impl LogMode {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        match annotations.get(LOG_MODE_ANNOTATION).map(String::as_str) {
            Some("PodOnly") => LogMode::PodOnly,
            Some("PodContainers") => LogMode::PodContainers,
            _ => LogMode::OwnerContainer,
        }
    }
}

#[derive(Clone)]
pub struct LogCollector {
    api: Arc<dyn ClusterApi>,
    timeout: Duration,
}

impl LogCollector {
    pub fn new(api: Arc<dyn ClusterApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Collects logs from `pod`. `owner_container` is the display name of the
    /// job, used as the container name in [`LogMode::OwnerContainer`].
    pub async fn collect(&self, pod: &Pod, owner_container: &str, mode: LogMode) -> String {
        match mode {
            LogMode::OwnerContainer => self.fetch(pod, Some(owner_container.to_string())).await,
            LogMode::PodOnly => self.fetch(pod, None).await,
            LogMode::PodContainers => {
                let containers: Vec<String> = pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();

                if let [only] = containers.as_slice() {
                    return self.fetch(pod, Some(only.clone())).await;
                }

                let mut out = String::new();
                for name in containers {
                    let body = self.fetch(pod, Some(name.clone())).await;
                    let _ = write!(out, "Container {} logs:\r\n{}\r\n", name, body);
                }
                out
            }
        }
    }

    async fn fetch(&self, pod: &Pod, container: Option<String>) -> String {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();

        match tokio::time::timeout(self.timeout, self.api.pod_logs(&namespace, &name, container.clone())).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(pod = %name, container = ?container, error = %e, "Failed to fetch logs");
                e.to_string()
            }
            Err(_) => {
                warn!(pod = %name, container = ?container, "Timed out fetching logs");
                format!("timed out fetching logs after {:?}", self.timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::testing::{pod, FakeCluster};
    use chrono::Utc;

    fn collector(fake: FakeCluster) -> LogCollector {
        LogCollector::new(Arc::new(fake), Duration::from_secs(5))
    }

    #[test]
    fn test_log_mode_from_annotations() {
        let mut annotations = BTreeMap::new();
        assert_eq!(LogMode::from_annotations(&annotations), LogMode::OwnerContainer);

        annotations.insert(LOG_MODE_ANNOTATION.to_string(), "PodOnly".to_string());
        assert_eq!(LogMode::from_annotations(&annotations), LogMode::PodOnly);

        annotations.insert(LOG_MODE_ANNOTATION.to_string(), "PodContainers".to_string());
        assert_eq!(LogMode::from_annotations(&annotations), LogMode::PodContainers);

        annotations.insert(LOG_MODE_ANNOTATION.to_string(), "Everything".to_string());
        assert_eq!(LogMode::from_annotations(&annotations), LogMode::OwnerContainer);
    }

    #[tokio::test]
    async fn test_pod_containers_concatenates_with_headers() {
        let collector = collector(
            FakeCluster::default()
                .with_log("c1", Ok("X"))
                .with_log("c2", Ok("X")),
        );
        let target = pod("job-abc", Utc::now(), "Succeeded", &["c1", "c2"]);

        let logs = collector.collect(&target, "job", LogMode::PodContainers).await;
        assert_eq!(logs, "Container c1 logs:\r\nX\r\nContainer c2 logs:\r\nX\r\n");
    }

    #[tokio::test]
    async fn test_pod_containers_single_container_is_unwrapped() {
        let collector = collector(FakeCluster::default().with_log("main", Ok("done\n")));
        let target = pod("job-abc", Utc::now(), "Succeeded", &["main"]);

        let logs = collector.collect(&target, "job", LogMode::PodContainers).await;
        assert_eq!(logs, "done\n");
    }

    #[tokio::test]
    async fn test_owner_container_uses_display_name() {
        let fake = Arc::new(FakeCluster::default().with_log("nightly-backup", Ok("backed up")));
        let collector = LogCollector::new(fake.clone(), Duration::from_secs(5));
        let target = pod("nightly-backup-28391-xyz", Utc::now(), "Succeeded", &["nightly-backup"]);

        let logs = collector.collect(&target, "nightly-backup", LogMode::OwnerContainer).await;
        assert_eq!(logs, "backed up");
        assert_eq!(
            fake.calls(),
            vec!["pod_logs default nightly-backup-28391-xyz nightly-backup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pod_only_surfaces_ambiguity_error_as_text() {
        let collector = collector(FakeCluster::default().with_log(
            "",
            Err("a container name must be specified for pod job-abc, choose one of: [c1 c2]"),
        ));
        let target = pod("job-abc", Utc::now(), "Failed", &["c1", "c2"]);

        let logs = collector.collect(&target, "job", LogMode::PodOnly).await;
        assert!(logs.contains("a container name must be specified"));
    }

    #[tokio::test]
    async fn test_missing_container_becomes_log_text() {
        let collector = collector(FakeCluster::default());
        let target = pod("job-abc", Utc::now(), "Failed", &["main"]);

        let logs = collector.collect(&target, "job", LogMode::OwnerContainer).await;
        assert!(logs.starts_with("Not found"));
    }
}
