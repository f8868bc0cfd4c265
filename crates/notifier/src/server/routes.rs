use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::metrics::gather_metrics;
use crate::tracker::Tracker;

pub async fn health(State(tracker): State<Arc<Tracker>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "tracked_jobs": tracker.tracked_jobs(),
    }))
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
