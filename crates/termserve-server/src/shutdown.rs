//! Graceful shutdown coordination via `CancellationToken` and `TaskTracker`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time to wait for open sessions before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across the listener and every session task.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a future that runs on a task someone else spawned.
    pub fn track<F>(&self, task: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        self.tracker.track_future(task)
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to finish"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "shutdown timed out after {timeout:?}, some sessions may still be running"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
