//! Fans a transition out to every configured backend.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, DeliveryConfig, DeliveryMode};
use crate::metrics;
use crate::monitoring::{Datadog, DogStatsdSocket, EventSubscriber, JobInfo};
use crate::notification::{notify, HttpSlackApi, MessageParam, MsTeamsV2, Notifier, Slack, Transition};
use crate::{Error, Result};

type Delivery<'a> = BoxFuture<'a, (String, Result<()>)>;

/// What happened to one dispatch.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

pub struct NotificationRouter {
    notifiers: Vec<(String, Arc<dyn Notifier>)>,
    subscribers: Vec<(String, Arc<dyn EventSubscriber>)>,
    mode: DeliveryMode,
    timeout: Duration,
}

impl NotificationRouter {
    pub fn new(mode: DeliveryMode, timeout: Duration) -> Self {
        Self {
            notifiers: Vec::new(),
            subscribers: Vec::new(),
            mode,
            timeout,
        }
    }

    pub fn with_notifier(mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push((name.into(), notifier));
        self
    }

    pub fn with_subscriber(
        mut self,
        name: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Self {
        self.subscribers.push((name.into(), subscriber));
        self
    }

    /// Builds one backend per registry entry. Missing credentials fail here,
    /// before any job is watched.
    pub fn from_backends(backends: &[BackendConfig], delivery: &DeliveryConfig) -> Result<Self> {
        let mut router = Self::new(delivery.mode, delivery.notify_timeout);
        for backend in backends {
            router = match backend {
                BackendConfig::Slack(config) => {
                    let api = HttpSlackApi::new(config, delivery.notify_timeout)?;
                    router.with_notifier(backend.name(), Arc::new(Slack::new(Arc::new(api), config)))
                }
                BackendConfig::MsTeamsV2(config) => router.with_notifier(
                    backend.name(),
                    Arc::new(MsTeamsV2::new(config, delivery.notify_timeout)?),
                ),
                BackendConfig::Datadog(config) => {
                    let socket = DogStatsdSocket::parse(&config.agent_addr)?;
                    router.with_subscriber(backend.name(), Arc::new(Datadog::new(Arc::new(socket), config)))
                }
            };
            info!(backend = backend.name(), "Notification backend enabled");
        }
        Ok(router)
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.notifiers
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.subscribers.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// Delivers `transition` to every notifier, and to every subscriber when
    /// the transition is terminal. A failing or slow backend never prevents
    /// delivery to the others.
    pub async fn dispatch(
        &self,
        transition: Transition,
        param: &MessageParam,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let info = job_info(param);
        let mut calls: Vec<Delivery<'_>> = Vec::new();

        for (name, notifier) in &self.notifiers {
            let notifier = notifier.clone();
            calls.push(self.bounded(name, async move {
                notify(notifier.as_ref(), transition, param).await
            }));
        }
        if transition.is_terminal() {
            for (name, subscriber) in &self.subscribers {
                let subscriber = subscriber.clone();
                let info = &info;
                calls.push(self.bounded(name, async move {
                    match transition {
                        Transition::Failed => subscriber.fail_event(info).await,
                        _ => subscriber.success_event(info).await,
                    }
                }));
            }
        }

        let mut report = DeliveryReport::default();
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(job = %param.job_name, %transition, "Shutdown interrupted notification delivery");
                report.cancelled = true;
                return report;
            }
            results = self.deliver(calls) => results,
        };

        for (name, result) in results {
            let event = transition.to_string();
            match result {
                Ok(()) => {
                    debug!(job = %param.job_name, backend = %name, %transition, "Delivered");
                    metrics::record_delivery(&name, &event, "delivered");
                    report.delivered.push(name);
                }
                Err(e) => {
                    warn!(job = %param.job_name, backend = %name, %transition, "Delivery failed: {}", e);
                    let outcome = if matches!(e, Error::Timeout(_)) { "timeout" } else { "error" };
                    metrics::record_delivery(&name, &event, outcome);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    fn bounded<'a, F>(&self, name: &str, call: F) -> Delivery<'a>
    where
        F: std::future::Future<Output = Result<()>> + Send + 'a,
    {
        let name = name.to_string();
        let timeout = self.timeout;
        async move {
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!("{} did not answer within {:?}", name, timeout))),
            };
            (name, result)
        }
        .boxed()
    }

    async fn deliver<'a>(&self, calls: Vec<Delivery<'a>>) -> Vec<(String, Result<()>)> {
        match self.mode {
            DeliveryMode::Parallel => join_all(calls).await,
            DeliveryMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(call.await);
                }
                results
            }
        }
    }
}

fn job_info(param: &MessageParam) -> JobInfo {
    JobInfo {
        name: param.job_name.clone(),
        cron_job_name: param.cron_job_name.clone(),
        namespace: param.namespace.clone(),
        annotations: param.annotations.clone(),
    }
}
