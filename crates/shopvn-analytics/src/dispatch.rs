use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result of waiting for outstanding background work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    /// Tasks still running when the timeout hit. They are detached, not
    /// cancelled.
    pub abandoned: usize,
}

/// Fire-and-forget task spawner that can be drained at teardown.
///
/// Callers never wait on an individual task; the only join point is
/// [`TaskDispatcher::drain`].
pub struct TaskDispatcher {
    name: &'static str,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskDispatcher {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `fut` on the current tokio runtime. Returns false if there is
    /// no runtime to run it on; the future is dropped in that case.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(dispatcher = self.name, "no async runtime, dropping task");
                return false;
            }
        };
        let task = handle.spawn(fut);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(task);
        true
    }

    /// Number of tasks not yet finished.
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Wait for every task spawned so far, in spawn order, for at most
    /// `timeout` in total.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let handles = std::mem::take(&mut *self.handles.lock());
        let total = handles.len();
        let mut completed = 0;
        let mut remaining = handles.into_iter();

        let waited = tokio::time::timeout(timeout, async {
            for handle in remaining.by_ref() {
                if let Err(e) = handle.await {
                    tracing::error!(dispatcher = self.name, error = %e, "background task failed");
                }
                completed += 1;
            }
        })
        .await;

        let report = DrainReport {
            completed,
            abandoned: total - completed,
        };
        if waited.is_err() {
            tracing::warn!(
                dispatcher = self.name,
                completed = report.completed,
                abandoned = report.abandoned,
                timeout_ms = timeout.as_millis() as u64,
                "drain timed out"
            );
        } else {
            tracing::debug!(dispatcher = self.name, completed, "drained background tasks");
        }
        report
    }
}
