//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the listener and every connection.
///
/// Each connection's termination signal is a child of the coordinator's
/// token, so one cancel reaches all of them. Connection tasks are spawned
/// through [`ShutdownCoordinator::spawn`] so shutdown can wait for them.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Clone of the server-wide token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A termination signal for one connection, fired by shutdown or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawn a task that graceful shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Track a future that something else polls, such as an upgraded socket.
    pub fn track<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.tasks.track_future(task)
    }

    /// Tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything, then wait up to `timeout` for `handles` and every
    /// tracked task to finish. Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.tasks.close();
        info!(
            task_count = handles.len() + self.tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.tasks.wait().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
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
