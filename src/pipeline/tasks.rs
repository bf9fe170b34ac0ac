//! Background task host for work detached from a request.
//!
//! Tasks spawned here are invisible to the request that scheduled them and
//! cannot be cancelled by it. At shutdown the host stops accepting work and
//! waits for in-flight tasks up to a bounded grace period.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Tracks detached background work so shutdown can wait for it.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named task. Tasks spawned after `shutdown` has begun still run,
    /// but shutdown no longer waits for them.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!(task = name, "Spawning background task after shutdown began");
        }
        debug!(task = name, "Background task spawned");
        self.tracker.spawn(fut)
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    /// Returns true if every task finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, grace_secs = grace.as_secs(), "Waiting for background tasks");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Background tasks still running after grace period"
                );
                false
            }
        }
    }

    /// Wait for all currently running tasks, then keep accepting work.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
