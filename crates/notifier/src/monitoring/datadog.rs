use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{UdpSocket, UnixDatagram};
use tracing::info;
use url::Url;

use super::{EventSubscriber, JobInfo};
use crate::config::DatadogConfig;
use crate::notification::is_annotation_true;
use crate::{Error, Result};

pub const HOST_NAME: &str = "kube-job-notifier";
pub const SERVICE_CHECK_NAME: &str = "kube_job_notifier.job.status";
pub const SUPPRESS_SUCCESS_SUBSCRIPTION_ANNOTATION: &str =
    "kube-job-notifier/suppress-success-datadog-subscription";
pub const SUPPRESS_FAILED_SUBSCRIPTION_ANNOTATION: &str =
    "kube-job-notifier/suppress-failed-datadog-subscription";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCheckStatus {
    Ok = 0,
    Critical = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCheck {
    pub name: String,
    pub status: ServiceCheckStatus,
    pub hostname: String,
    pub tags: Vec<String>,
    pub message: String,
}

impl ServiceCheck {
    /// DogStatsD wire form: `_sc|name|status|h:host|#tags|m:message`.
    /// Client-wide tags precede the check's own tags.
    pub fn encode(&self, namespace: &str, global_tags: &[String]) -> String {
        let mut out = format!(
            "_sc|{}{}|{}|h:{}",
            namespace, self.name, self.status as u8, self.hostname
        );
        let tags: Vec<&str> = global_tags
            .iter()
            .chain(self.tags.iter())
            .map(String::as_str)
            .collect();
        if !tags.is_empty() {
            out.push_str("|#");
            out.push_str(&tags.join(","));
        }
        if !self.message.is_empty() {
            out.push_str("|m:");
            out.push_str(&self.message.replace('\n', "\\n").replace("m:", "m\\:"));
        }
        out
    }
}

/// Where encoded datagrams are written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsdSink: Send + Sync {
    async fn send(&self, datagram: &str) -> Result<()>;
}

/// DogStatsD agent endpoint, either a Unix datagram socket or UDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DogStatsdSocket {
    Unix(PathBuf),
    Udp(String),
}

impl DogStatsdSocket {
    /// Accepts `unix:///path`, `udp://host:port` or a bare `host:port`.
    pub fn parse(target: &str) -> Result<Self> {
        if !target.contains("://") {
            return Ok(DogStatsdSocket::Udp(target.to_string()));
        }
        let url = Url::parse(target)
            .map_err(|e| Error::Config(format!("invalid DogStatsD address {}: {}", target, e)))?;
        match url.scheme() {
            "unix" => Ok(DogStatsdSocket::Unix(PathBuf::from(url.path()))),
            "udp" => {
                let host = url.host_str().unwrap_or("localhost");
                let port = url.port().unwrap_or(8125);
                Ok(DogStatsdSocket::Udp(format!("{}:{}", host, port)))
            }
            other => Err(Error::Config(format!(
                "unsupported DogStatsD scheme {} in {}",
                other, target
            ))),
        }
    }
}

#[async_trait]
impl StatsdSink for DogStatsdSocket {
    async fn send(&self, datagram: &str) -> Result<()> {
        match self {
            DogStatsdSocket::Unix(path) => {
                let socket = UnixDatagram::unbound()?;
                socket.send_to(datagram.as_bytes(), path).await?;
            }
            DogStatsdSocket::Udp(addr) => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.send_to(datagram.as_bytes(), addr.as_str()).await?;
            }
        }
        Ok(())
    }
}

pub struct Datadog {
    sink: Arc<dyn StatsdSink>,
    namespace: String,
    global_tags: Vec<String>,
}

impl Datadog {
    pub fn new(sink: Arc<dyn StatsdSink>, config: &DatadogConfig) -> Self {
        Self {
            sink,
            namespace: config.namespace.clone(),
            global_tags: config.tags.clone(),
        }
    }

    fn service_check(job: &JobInfo, status: ServiceCheckStatus, message: &str) -> ServiceCheck {
        ServiceCheck {
            name: SERVICE_CHECK_NAME.to_string(),
            status,
            hostname: HOST_NAME.to_string(),
            tags: vec![
                format!("job_name:{}", job.display_name()),
                format!("namespace:{}", job.namespace),
            ],
            message: message.to_string(),
        }
    }

    async fn submit(&self, job: &JobInfo, check: ServiceCheck) -> Result<()> {
        let datagram = check.encode(&self.namespace, &self.global_tags);
        self.sink.send(&datagram).await?;
        info!(job = %job.display_name(), "Service check submitted");
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for Datadog {
    async fn success_event(&self, job: &JobInfo) -> Result<()> {
        if is_annotation_true(&job.annotations, SUPPRESS_SUCCESS_SUBSCRIPTION_ANNOTATION) {
            info!(job = %job.name, "Datadog success event is suppressed");
            return Ok(());
        }
        self.submit(job, Self::service_check(job, ServiceCheckStatus::Ok, "Job succeed"))
            .await
    }

    async fn fail_event(&self, job: &JobInfo) -> Result<()> {
        if is_annotation_true(&job.annotations, SUPPRESS_FAILED_SUBSCRIPTION_ANNOTATION) {
            info!(job = %job.name, "Datadog failure event is suppressed");
            return Ok(());
        }
        self.submit(job, Self::service_check(job, ServiceCheckStatus::Critical, "Job failed"))
            .await
    }
}
