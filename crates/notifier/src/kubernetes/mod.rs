//! Narrow query contract over the cluster API.
//!
//! Everything the notifier needs from Kubernetes goes through [`ClusterApi`],
//! which keeps the tracker and correlator testable without a cluster.

mod client;
#[cfg(test)]
pub(crate) mod testing;

pub use client::KubeClusterApi;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::Result;

/// Label the Job controller puts on its pods, valued with the Job uid.
pub const CONTROLLER_UID_LABEL: &str = "controller-uid";
/// Older label scheme, valued with the Job name.
pub const JOB_NAME_LABEL: &str = "job-name";

pub const POD_PHASE_PENDING: &str = "Pending";

/// Served versions of the CronJob resource, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronJobVersion {
    V1Beta1,
    V1,
}

impl CronJobVersion {
    pub const LOOKUP_ORDER: [CronJobVersion; 2] = [CronJobVersion::V1Beta1, CronJobVersion::V1];

    pub fn api_version(&self) -> &'static str {
        match self {
            CronJobVersion::V1Beta1 => "batch/v1beta1",
            CronJobVersion::V1 => "batch/v1",
        }
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Lists pods in `namespace` matching a label selector such as `controller-uid=abc`.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Fetches pod logs; `container` of `None` lets the API server pick
    /// (which fails for multi-container pods).
    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<String>) -> Result<String>;

    /// Reads a CronJob through the given API version and returns its name.
    async fn get_cron_job(&self, namespace: &str, name: &str, version: CronJobVersion) -> Result<String>;
}
