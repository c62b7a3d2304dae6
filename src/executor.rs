//! Application-facing callback execution.

use crate::error::EventSourceError;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

/// A unit of callback work handed to a [`CallbackExecutor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs application callbacks away from the connection task.
///
/// Implementations must run jobs in the order they were submitted.
pub trait CallbackExecutor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

/// Default executor: a single tokio task draining a FIFO queue.
///
/// Callbacks run one at a time, so a slow handler delays later events
/// but never reorders them.
#[derive(Debug, Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Spawn the executor task on the current tokio runtime.
    pub fn spawn() -> Result<Self, EventSourceError> {
        let handle = Handle::try_current().map_err(|_| EventSourceError::NoRuntime)?;
        Ok(Self::spawn_on(&handle))
    }

    /// Spawn the executor task on the given runtime.
    pub fn spawn_on(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }
}

impl CallbackExecutor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            debug!("Callback executor stopped, dropping callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let executor = assert_ok!(SerialExecutor::spawn());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            executor.execute(Box::new(move || seen.lock().push(i)));
        }

        let (done_tx, done_rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = done_tx.send(());
        }));
        done_rx.await.unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        assert_eq!(SerialExecutor::spawn().unwrap_err(), EventSourceError::NoRuntime);
    }
}
