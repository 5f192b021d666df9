//! Interface to the remote queue service.

use crate::error::QueueError;
use crate::message::{LeaseHandle, MessageId, QueueHandle, QueueName, ReceiveRequest, ReceivedMessage};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// Operations a visibility-timeout backend must provide.
///
/// Implemented by [`SqsGateway`](crate::providers::SqsGateway) for AWS SQS and
/// [`InMemoryGateway`](crate::providers::InMemoryGateway) for tests and local
/// development. All queue-level calls take the handle returned by
/// [`resolve_queue`](Self::resolve_queue) or [`create_queue`](Self::create_queue).
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Look up a queue by name; `QueueError::QueueNotFound` when absent
    async fn resolve_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError>;

    /// Create a queue and return its handle
    async fn create_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError>;

    /// Send one message body
    async fn send_message(&self, queue: &QueueHandle, body: Bytes)
        -> Result<MessageId, QueueError>;

    /// Receive up to `request.max_messages`, hiding each for the visibility timeout
    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Reset the invisibility window of one delivery
    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        lease: &LeaseHandle,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Delete one delivered message
    async fn delete_message(&self, queue: &QueueHandle, lease: &LeaseHandle)
        -> Result<(), QueueError>;

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError>;

    /// Fetch the named queue attributes; absent attributes are omitted
    async fn get_attributes(
        &self,
        queue: &QueueHandle,
        names: &[&str],
    ) -> Result<HashMap<String, String>, QueueError>;

    async fn set_attributes(
        &self,
        queue: &QueueHandle,
        attributes: HashMap<String, String>,
    ) -> Result<(), QueueError>;
}
