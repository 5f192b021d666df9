//! Background worker loop dispatching dequeued entries to a handler.

use crate::client::{LeaseQueue, WorkQueue};
use crate::entry::QueueEntry;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one dequeued entry.
///
/// Returning an error (or panicking) abandons the entry so it is redelivered
/// once its lease expires. Implemented for async closures taking the entry and
/// the worker's cancellation token.
#[async_trait]
pub trait WorkItemHandler<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn handle(
        &self,
        entry: Arc<QueueEntry<T>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F, Fut> WorkItemHandler<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(Arc<QueueEntry<T>>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        entry: Arc<QueueEntry<T>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        (self)(entry, cancel).await
    }
}

/// Handle to a running worker task
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Token observed by the worker and passed to its handler
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the worker to stop and wait for the in-flight entry to finish
    pub async fn stop(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.task.await
    }

    /// Wait for the worker to exit on its own (after its parent token fires)
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

impl<T> LeaseQueue<T>
where
    T: Send + Sync + 'static,
{
    /// Spawn a worker that dequeues and dispatches entries until `cancel` fires.
    ///
    /// One entry is in flight at a time. With `auto_complete`, entries the
    /// handler leaves active are completed after it returns `Ok`. Handler
    /// failures increment the `errors` counter and abandon the entry.
    pub fn start_working<H>(
        &self,
        handler: H,
        auto_complete: bool,
        cancel: CancellationToken,
    ) -> WorkerHandle
    where
        H: WorkItemHandler<T> + 'static,
    {
        let token = cancel.child_token();
        let queue = self.clone();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            // Releases the child token from its parent however the task ends
            let _guard = task_token.clone().drop_guard();
            queue.work_loop(&handler, auto_complete, &task_token).await;
        });

        WorkerHandle {
            cancel: token,
            task,
        }
    }

    async fn work_loop<H>(&self, handler: &H, auto_complete: bool, cancel: &CancellationToken)
    where
        H: WorkItemHandler<T>,
    {
        let queue = &self.inner.options.name;
        info!(queue = %queue, auto_complete, "Worker started");

        while !cancel.is_cancelled() {
            let entry = match self.dequeue(cancel).await {
                Ok(Some(entry)) => Arc::new(entry),
                Ok(None) => continue,
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Dequeue failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.inner.options.dequeue_interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                    continue;
                }
            };

            self.dispatch(handler, entry, auto_complete, cancel).await;
        }

        info!(queue = %queue, "Worker stopped");
    }

    async fn dispatch<H>(
        &self,
        handler: &H,
        entry: Arc<QueueEntry<T>>,
        auto_complete: bool,
        cancel: &CancellationToken,
    ) where
        H: WorkItemHandler<T>,
    {
        let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&entry), cancel.clone()))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(format!("handler panicked: {}", panic_message(panic.as_ref()))),
        };

        match failure {
            None => {
                if auto_complete && entry.is_active() {
                    if let Err(e) = self.complete(&entry).await {
                        error!(message_id = %entry.id(), error = %e, "Failed to complete entry");
                    }
                } else {
                    debug!(message_id = %entry.id(), state = %entry.state(), "Handler finished");
                }
            }
            Some(reason) => {
                self.inner.counters.record_error();
                error!(
                    message_id = %entry.id(),
                    attempt = entry.attempt(),
                    error = %reason,
                    "Work item handler failed"
                );

                if entry.is_active() {
                    if let Err(e) = self.abandon(&entry).await {
                        error!(message_id = %entry.id(), error = %e, "Failed to abandon entry");
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
