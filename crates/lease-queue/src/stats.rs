//! Queue statistics: process-local counters merged with remote queue depth.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a queue.
///
/// `queued`, `working` and `deadletter` come from the backend and are
/// approximate. The remaining fields count what this client instance has done
/// since it was created or since the last `delete_queue`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Messages waiting to be received
    pub queued: u64,
    /// Messages received and currently hidden
    pub working: u64,
    /// Messages waiting in the dead-letter queue
    pub deadletter: u64,
    pub enqueued: u64,
    pub dequeued: u64,
    pub completed: u64,
    pub abandoned: u64,
    /// Handler failures observed by workers
    pub errors: u64,
    /// Always 0; lease expiry is tracked by the backend
    pub timeouts: u64,
}

/// Monotonic per-client counters
#[derive(Debug, Default)]
pub struct QueueCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    errors: AtomicU64,
}

impl QueueCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Local counters with the remote fields left at zero
    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            ..QueueStats::default()
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.enqueued,
            &self.dequeued,
            &self.completed,
            &self.abandoned,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Parse an approximate-count attribute; absent or malformed values count as 0
pub(crate) fn parse_count(value: Option<&String>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
