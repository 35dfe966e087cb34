//! Graceful shutdown coordination.
//!
//! A [`ShutdownController`] broadcasts a single stop flag over a watch
//! channel. The HTTP server and every background task hold a receiver and
//! exit once the flag flips.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Broadcasts the stop flag to the server and background tasks
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Create a controller in the running state
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Receiver that observes the stop flag
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Flip the stop flag. Later calls are no-ops.
    pub fn trigger(&self, reason: &str) {
        let changed = self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if changed {
            info!(reason = reason, "Shutdown triggered");
        }
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolve once `rx` observes the stop flag or its sender is dropped
pub async fn wait_for_stop(mut rx: watch::Receiver<bool>) {
    // An error means the controller is gone, which also ends the wait.
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Wait for Ctrl+C or SIGTERM and return the signal name
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "ctrl+c",
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "sigterm"
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&'static str>();

    let name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
    };
    info!(signal = name, "Received shutdown signal");
    name
}
