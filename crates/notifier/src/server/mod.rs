mod routes;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::tracker::Tracker;
use crate::Result;

/// Health and metrics endpoints.
pub struct Server {
    tracker: Arc<Tracker>,
}

impl Server {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }

    pub fn build_router(self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.tracker)
    }

    /// Serves until `cancel` fires.
    pub async fn start(self, addr: &str, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Serving health and metrics on {}", listener.local_addr()?);
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }
}
