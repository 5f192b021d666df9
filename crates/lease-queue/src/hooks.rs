//! Lifecycle hooks invoked by the queue client.

use crate::entry::QueueEntry;
use async_trait::async_trait;

/// Observer of queue entry lifecycle events.
///
/// Every method has a no-op default, so implementors override only what they
/// need. Hooks run inline on the calling task; a slow hook slows the operation
/// that triggered it.
#[async_trait]
pub trait QueueHooks<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Called before a payload is sent. Returning `false` vetoes the enqueue:
    /// no message is sent and `enqueue` returns `Ok(None)`.
    async fn on_enqueuing(&self, _value: &T) -> bool {
        true
    }

    async fn on_enqueued(&self, _entry: &QueueEntry<T>) {}

    async fn on_dequeued(&self, _entry: &QueueEntry<T>) {}

    async fn on_completed(&self, _entry: &QueueEntry<T>) {}

    async fn on_abandoned(&self, _entry: &QueueEntry<T>) {}
}
