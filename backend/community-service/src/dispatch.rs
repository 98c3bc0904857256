/// Callback delivery for repository operations
///
/// Repository methods are plain `async fn`s. Consumers that want
/// listener-style results (a UI layer, for instance) hand the future to
/// `spawn_operation` together with a completion callback. The callback runs
/// exactly once with either the operation's result or `Cancelled`.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{ServiceError, ServiceResult};

/// Handle to an operation started with `spawn_operation`
#[derive(Debug)]
pub struct OperationHandle {
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

impl OperationHandle {
    /// Request cancellation
    ///
    /// If the operation has not finished yet its future is dropped and the
    /// callback receives `ServiceError::Cancelled`. Has no effect once the
    /// callback has run. Remote writes already sent may still be applied.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// True once the callback has run
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the callback has run
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "operation task failed");
        }
    }
}

/// Run `operation` on the tokio runtime and deliver its result to `on_complete`
pub fn spawn_operation<F, T, C>(operation: F, on_complete: C) -> OperationHandle
where
    F: Future<Output = ServiceResult<T>> + Send + 'static,
    T: Send + 'static,
    C: FnOnce(ServiceResult<T>) + Send + 'static,
{
    let cancel = Arc::new(Notify::new());
    let signal = cancel.clone();

    let task = tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = signal.notified() => {
                tracing::debug!("operation cancelled");
                Err(ServiceError::Cancelled)
            }
            result = operation => result,
        };
        on_complete(result);
    });

    OperationHandle { cancel, task }
}
