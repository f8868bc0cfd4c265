use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kube_job_notifier::{
    clock::SystemClock,
    config::Config,
    kubernetes::KubeClusterApi,
    metrics,
    router::NotificationRouter,
    server::Server,
    signal::ShutdownSignal,
    tracker::Tracker,
    watcher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().context("loading configuration")?;
    info!(
        namespace = %config.kube.namespace,
        backends = config.backends.len(),
        "Loaded configuration"
    );

    metrics::register_metrics().context("registering metrics")?;

    let router = NotificationRouter::from_backends(&config.backends, &config.delivery)
        .context("building notification backends")?;

    let cluster = KubeClusterApi::try_default()
        .await
        .context("connecting to Kubernetes")?;
    let client = cluster.client();

    let cancel = CancellationToken::new();
    let tracker = Arc::new(
        Tracker::new(Arc::new(cluster), router, Arc::new(SystemClock), cancel.clone())
            .with_cronjob_filter(config.kube.cronjob_regex.clone())
            .with_pod_wait(config.pod_wait)
            .with_log_fetch_timeout(config.delivery.log_fetch_timeout),
    );
    info!(started_at = %tracker.started_at(), "Tracking jobs created from now on");

    let server = Server::new(tracker.clone());
    let server_addr = config.server.addr.clone();
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.start(&server_addr, server_cancel).await {
            error!("Server error: {}", e);
        }
    });

    ShutdownSignal::listen()
        .context("installing signal handlers")?
        .cancel_on_signal(cancel.clone());

    watcher::run(client, &config.kube.namespace, tracker, cancel.clone())
        .await
        .context("watching jobs")?;

    cancel.cancel();
    let _ = server_task.await;
    info!("Stopped");
    Ok(())
}
