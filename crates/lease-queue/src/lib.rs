//! # Lease Queue
//!
//! Client engine for visibility-timeout message queues such as AWS SQS.
//!
//! This library provides:
//! - Typed enqueue/dequeue with pluggable payload serializers
//! - Leases: a received entry stays hidden until it is completed, abandoned,
//!   or its lease expires, and the lease can be renewed while work continues
//! - A background worker loop with complete-on-success and abandon-on-failure
//! - Dead-letter queue provisioning through the backend's redrive policy
//! - Concurrent-safe queue bootstrapping and statistics
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Identifiers and wire types exchanged with the backend
//! - [`entry`] - Queue entries and their lease state machine
//! - [`gateway`] - Backend interface; implementations live in [`providers`]
//! - [`client`] - The queue client and its builder
//! - [`worker`] - Background dispatch loop
//! - [`options`] - Queue options and settings loading
//!
//! ## Example
//!
//! ```rust
//! use lease_queue::{InMemoryGateway, LeaseQueue, QueueOptions, WorkQueue};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let queue: LeaseQueue<serde_json::Value> =
//!     LeaseQueue::builder(QueueOptions::new("orders".parse().unwrap()))
//!         .gateway(Arc::new(InMemoryGateway::new()))
//!         .build()
//!         .unwrap();
//!
//! queue.enqueue(serde_json::json!({"id": 1})).await.unwrap();
//!
//! let cancel = CancellationToken::new();
//! let entry = queue.dequeue(&cancel).await.unwrap().unwrap();
//! assert_eq!(entry.value()["id"], 1);
//! queue.complete(&entry).await.unwrap();
//!
//! assert_eq!(queue.get_stats().await.unwrap().completed, 1);
//! # });
//! ```

pub mod bootstrap;
pub mod client;
pub mod entry;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod message;
pub mod options;
pub mod providers;
pub mod serializer;
pub mod stats;
pub mod worker;

// Re-export commonly used types at crate root for convenience
pub use client::{LeaseQueue, LeaseQueueBuilder, WorkQueue};
pub use entry::{EntryState, QueueEntry};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use gateway::QueueGateway;
pub use hooks::QueueHooks;
pub use message::{
    LeaseHandle, MessageId, QueueHandle, QueueName, ReceiveRequest, ReceivedMessage,
    RedrivePolicy, Timestamp,
};
pub use options::{LeaseQueueSettings, QueueOptions, SqsConnection};
pub use providers::{InMemoryGateway, SqsGateway};
pub use serializer::{JsonSerializer, Serializer};
pub use stats::QueueStats;
pub use worker::{WorkItemHandler, WorkerHandle};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
