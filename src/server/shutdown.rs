//! Run state and shutdown signalling
//!
//! [`RunState`] is the one-way `Running -> Stopping` switch shared by the
//! broadcast loop, the acceptor and the server. Clones observe the same
//! state.

use std::sync::Arc;

use tokio::sync::watch;

/// Process run phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Serving consumers
    Running,
    /// Shutdown requested; nothing new starts
    Stopping,
}

/// Shared handle on the run phase
#[derive(Debug, Clone)]
pub struct RunState {
    tx: Arc<watch::Sender<RunPhase>>,
}

impl RunState {
    /// Create a state in [`RunPhase::Running`]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunPhase::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        *self.tx.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.phase() == RunPhase::Stopping
    }

    /// Request shutdown
    ///
    /// Returns `true` for the call that performed the transition and `false`
    /// if shutdown was already requested.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|phase| match phase {
            RunPhase::Running => {
                *phase = RunPhase::Stopping;
                true
            }
            RunPhase::Stopping => false,
        })
    }

    /// Resolve once shutdown has been requested
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|phase| *phase == RunPhase::Stopping).await;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGINT, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
