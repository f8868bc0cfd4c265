//! In-memory [`ClusterApi`] used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use super::{ClusterApi, CronJobVersion};
use crate::{Error, Result};

pub fn pod(name: &str, created: DateTime<Utc>, phase: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            creation_timestamp: Some(Time(created)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

#[derive(Default)]
pub struct FakeCluster {
    /// Pods keyed by label selector.
    pub pods: Mutex<HashMap<String, Vec<Pod>>>,
    pub list_error: Mutex<Option<String>>,
    /// Phases handed out by successive `get_pod` calls; the last one repeats.
    pub phases: Mutex<VecDeque<String>>,
    /// Logs keyed by container name, `""` for the unfiltered request.
    pub logs: Mutex<HashMap<String, std::result::Result<String, String>>>,
    pub cron_jobs: Mutex<HashMap<(CronJobVersion, String), String>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn with_pods(self, selector: &str, pods: Vec<Pod>) -> Self {
        self.pods.lock().unwrap().insert(selector.to_string(), pods);
        self
    }

    pub fn with_phases(self, phases: &[&str]) -> Self {
        *self.phases.lock().unwrap() = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_log(self, container: &str, body: std::result::Result<&str, &str>) -> Self {
        self.logs.lock().unwrap().insert(
            container.to_string(),
            body.map(str::to_string).map_err(str::to_string),
        );
        self
    }

    pub fn with_cron_job(self, version: CronJobVersion, name: &str) -> Self {
        self.cron_jobs
            .lock()
            .unwrap()
            .insert((version, name.to_string()), name.to_string());
        self
    }

    pub fn failing_lists(self, message: &str) -> Self {
        *self.list_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.record(format!("list_pods {} {}", namespace, label_selector));
        if let Some(message) = self.list_error.lock().unwrap().clone() {
            return Err(Error::Kubernetes(message));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(label_selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.record(format!("get_pod {} {}", namespace, name));
        let mut phases = self.phases.lock().unwrap();
        let phase = if phases.len() > 1 {
            phases.pop_front()
        } else {
            phases.front().cloned()
        };
        match phase {
            Some(phase) => Ok(pod(name, Utc::now(), &phase, &["main"])),
            None => Err(Error::NotFound(format!("pod {}", name))),
        }
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<String>) -> Result<String> {
        let container = container.unwrap_or_default();
        self.record(format!("pod_logs {} {} {}", namespace, pod, container));
        match self.logs.lock().unwrap().get(&container) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(Error::Kubernetes(message.clone())),
            None => Err(Error::NotFound(format!("container {} not found", container))),
        }
    }

    async fn get_cron_job(&self, namespace: &str, name: &str, version: CronJobVersion) -> Result<String> {
        self.record(format!("get_cron_job {} {} {}", namespace, name, version.api_version()));
        self.cron_jobs
            .lock()
            .unwrap()
            .get(&(version, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cronjob {} ({})", name, version.api_version())))
    }
}
