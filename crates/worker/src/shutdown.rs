//! Graceful shutdown: `Running -> Draining -> Stopped`.
//!
//! [`ShutdownCoordinator::shutdown`] cancels the shared token, which stops
//! every consumer before its next read, then waits for the consumer tasks up
//! to the grace period. Tasks still running at the deadline are aborted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// What happened to the tasks handed to [`ShutdownCoordinator::shutdown`].
#[derive(Debug)]
pub struct DrainReport<T> {
    /// Return values of tasks that finished within the grace period.
    pub finished: Vec<T>,
    /// Tasks that panicked.
    pub failed: usize,
    /// Tasks aborted at the deadline.
    pub aborted: usize,
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    state: Arc<Mutex<ShutdownState>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(Mutex::new(ShutdownState::Running)),
            grace,
        }
    }

    /// Token the consumer loops watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> ShutdownState {
        *self.lock()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShutdownState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ShutdownState) {
        *self.lock() = state;
        tracing::info!(state = ?state, "Shutdown state changed");
    }

    /// Stop reading and wait (bounded by the grace period) for `tasks`.
    pub async fn shutdown<T>(&self, tasks: Vec<JoinHandle<T>>) -> DrainReport<T> {
        self.set_state(ShutdownState::Draining);
        self.token.cancel();

        let deadline = Instant::now() + self.grace;
        let mut report = DrainReport {
            finished: Vec::with_capacity(tasks.len()),
            failed: 0,
            aborted: 0,
        };

        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(value)) => report.finished.push(value),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Consumer task failed");
                    report.failed += 1;
                }
                Err(_) => {
                    task.abort();
                    report.aborted += 1;
                }
            }
        }

        if report.aborted > 0 {
            tracing::warn!(
                aborted = report.aborted,
                grace_ms = self.grace.as_millis() as u64,
                "Abandoned in-flight work after grace period"
            );
        }
        self.set_state(ShutdownState::Stopped);
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
