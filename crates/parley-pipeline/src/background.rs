//! Fire-and-forget side effects, drained at shutdown.

use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Tracks background tasks so shutdown can wait for them.
///
/// Task failures and panics are logged and never reach the caller.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` and return immediately.
    pub fn schedule<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tracker.spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!(task = name, "Background task finished"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                Err(e) if e.is_panic() => warn!(task = name, "Background task panicked"),
                Err(e) => warn!(task = name, error = %e, "Background task cancelled"),
            }
        });
    }

    /// Tasks not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task scheduled so far, whatever its outcome.
    pub async fn drain(&self) {
        let pending = self.pending();
        if pending > 0 {
            debug!(pending, "Draining background tasks");
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
