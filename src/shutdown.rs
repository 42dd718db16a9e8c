//! Process-wide shutdown coordination.
//!
//! A single root [`CancellationToken`] is created at startup. Every long-running
//! operation (client connect, server listen, each session) runs under a child
//! token derived from it, so triggering the root unwinds everything below.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Root cancellation scope shared by the host process and the core components.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    root: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    /// Creates a fresh, untriggered root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a child scope for one long-running operation.
    ///
    /// Cancelling the child never affects the root or sibling scopes.
    pub fn scope(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Triggers shutdown. Returns `true` only for the call that actually fired.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("received abort signal");
        self.root.cancel();
        true
    }

    /// Returns true once shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves when shutdown has been triggered.
    pub async fn triggered(&self) {
        self.root.cancelled().await
    }

    /// Spawns a task that triggers shutdown on the first termination signal.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => match signal {
                    Ok(name) => tracing::debug!(signal = name, "termination signal received"),
                    Err(e) => tracing::warn!(error = %e, "failed to listen for termination signals"),
                },
                _ = shutdown.triggered() => return,
            }
            shutdown.trigger();
        })
    }
}

/// Waits for SIGINT, or SIGTERM on Unix.
async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}
