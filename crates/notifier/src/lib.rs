pub mod clock;
pub mod config;
pub mod correlator;
pub mod job;
pub mod kubernetes;
pub mod logs;
pub mod metrics;
pub mod monitoring;
pub mod notification;
pub mod router;
pub mod server;
pub mod signal;
pub mod template;
pub mod tracker;
pub mod watcher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Delivery error: {0}")]
    Delivery(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message),
            other => Error::Kubernetes(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
