//! Process shutdown signals.
//!
//! Kubernetes stops a pod with SIGTERM and a terminal sends SIGINT; either one
//! should cancel in-flight pod waits and fan-outs.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;

pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Installs the handlers. Signals arriving after this call are not lost.
    pub fn listen() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub async fn recv(mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }

    /// Cancels `cancel` once a signal arrives.
    pub fn cancel_on_signal(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let signal = self.recv().await;
            info!(signal, "Shutdown signal received");
            cancel.cancel();
        })
    }
}
