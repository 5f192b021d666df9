//! Queue entries: a typed payload plus the lease needed to act on its delivery.

use crate::error::QueueError;
use crate::message::{LeaseHandle, MessageId, Timestamp};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    Completed,
    Abandoned,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Completed => 1,
            Self::Abandoned => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Completed,
            2 => Self::Abandoned,
            _ => Self::Active,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A unit of work in flight.
///
/// Entries are created per delivery by `dequeue` (carrying the lease handle)
/// and per publish acknowledgement by `enqueue` (without one). The state moves
/// from [`EntryState::Active`] to a terminal state exactly once.
pub struct QueueEntry<T> {
    id: MessageId,
    value: T,
    lease_handle: Option<LeaseHandle>,
    enqueued_at: Timestamp,
    attempt: u32,
    state: AtomicU8,
    queue_id: Uuid,
}

impl<T> QueueEntry<T> {
    pub(crate) fn new(
        queue_id: Uuid,
        id: MessageId,
        value: T,
        lease_handle: Option<LeaseHandle>,
        enqueued_at: Timestamp,
        attempt: u32,
    ) -> Self {
        Self {
            id,
            value,
            lease_handle,
            enqueued_at,
            attempt,
            state: AtomicU8::new(EntryState::Active.as_u8()),
            queue_id,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the entry, keeping only the payload
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn lease_handle(&self) -> Option<&LeaseHandle> {
        self.lease_handle.as_ref()
    }

    pub fn enqueued_at(&self) -> &Timestamp {
        &self.enqueued_at
    }

    /// Delivery attempt reported by the backend; 0 for freshly enqueued entries
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == EntryState::Active
    }

    pub(crate) fn queue_id(&self) -> Uuid {
        self.queue_id
    }

    /// Fail unless the entry is still active
    pub(crate) fn ensure_active(&self) -> Result<(), QueueError> {
        match self.state() {
            EntryState::Active => Ok(()),
            state => Err(QueueError::InvalidEntryState {
                message_id: self.id.to_string(),
                state,
            }),
        }
    }

    /// Move from Active to `terminal`; a second transition is rejected.
    pub(crate) fn transition(&self, terminal: EntryState) -> Result<(), QueueError> {
        debug_assert!(terminal.is_terminal());
        self.state
            .compare_exchange(
                EntryState::Active.as_u8(),
                terminal.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| QueueError::InvalidEntryState {
                message_id: self.id.to_string(),
                state: EntryState::from_u8(current),
            })
    }

    /// Return a claimed entry to Active after the remote call backing the
    /// claim failed. Only undoes `terminal`, never another caller's claim.
    pub(crate) fn release(&self, terminal: EntryState) {
        let _ = self.state.compare_exchange(
            terminal.as_u8(),
            EntryState::Active.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl<T: fmt::Debug> fmt::Debug for QueueEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("value", &self.value)
            .field("attempt", &self.attempt)
            .field("state", &self.state())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
