use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kube_job_notifier_notifications_total",
            "Backend deliveries by backend, event and outcome."
        ),
        &["backend", "event", "outcome"]
    )
    .expect("metric options are valid");
    pub static ref TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kube_job_notifier_transitions_total",
            "Job events handled by the tracker, by outcome."
        ),
        &["outcome"]
    )
    .expect("metric options are valid");
    pub static ref TRACKED_JOBS: IntGauge = IntGauge::new(
        "kube_job_notifier_tracked_jobs",
        "Jobs with notification state held in memory."
    )
    .expect("metric options are valid");
}

/// Registers every collector with [`REGISTRY`]. Call once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRANSITIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRACKED_JOBS.clone()))?;
    Ok(())
}

pub fn record_delivery(backend: &str, event: &str, outcome: &str) {
    NOTIFICATIONS_TOTAL
        .with_label_values(&[backend, event, outcome])
        .inc();
}

pub fn record_transition(outcome: &str) {
    TRANSITIONS_TOTAL.with_label_values(&[outcome]).inc();
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
