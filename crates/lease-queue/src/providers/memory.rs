//! In-memory queue gateway for testing and development.
//!
//! Behaves like a visibility-timeout backend:
//! - received messages stay hidden for the requested visibility timeout
//! - every delivery gets a fresh lease handle; stale handles are rejected
//! - receives long-poll up to the requested wait time
//! - a `RedrivePolicy` attribute moves messages to the target queue once their
//!   receive count reaches `maxReceiveCount`, on the next receive attempt
//!
//! Call counters, injected latency and one-shot failures let tests observe and
//! perturb the traffic a queue client generates.

use crate::error::QueueError;
use crate::gateway::QueueGateway;
use crate::message::{
    attributes, LeaseHandle, MessageId, QueueHandle, QueueName, ReceiveRequest, ReceivedMessage,
    RedrivePolicy, Timestamp,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const POLL_STEP: Duration = Duration::from_millis(10);

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct GatewayState {
    /// Queue URL by name
    urls: HashMap<QueueName, String>,
    /// Queues by URL
    queues: HashMap<String, MemoryQueue>,
}

impl GatewayState {
    fn queue_mut(&mut self, handle: &QueueHandle) -> Result<&mut MemoryQueue, QueueError> {
        self.queues
            .get_mut(handle.as_str())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: handle.to_string(),
            })
    }

    fn url_for_arn(&self, arn: &str) -> Option<String> {
        self.queues
            .iter()
            .find(|(_, queue)| queue.arn == arn)
            .map(|(url, _)| url.clone())
    }
}

struct MemoryQueue {
    arn: String,
    attributes: HashMap<String, String>,
    messages: VecDeque<StoredMessage>,
}

impl MemoryQueue {
    fn redrive_policy(&self) -> Option<RedrivePolicy> {
        self.attributes
            .get(attributes::REDRIVE_POLICY)
            .and_then(|raw| RedrivePolicy::from_attribute(raw).ok())
    }

    fn find_lease(&mut self, lease: &LeaseHandle) -> Result<usize, QueueError> {
        self.messages
            .iter()
            .position(|m| m.lease.as_deref() == Some(lease.as_str()))
            .ok_or_else(|| QueueError::MessageNotFound {
                lease: lease.to_string(),
            })
    }
}

struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    sent_at: Timestamp,
    receive_count: u32,
    visible_at: Instant,
    lease: Option<String>,
}

impl StoredMessage {
    fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
            sent_at: Timestamp::now(),
            receive_count: 0,
            visible_at: Instant::now(),
            lease: None,
        }
    }

    fn is_visible(&self, now: Instant) -> bool {
        now >= self.visible_at
    }
}

// ============================================================================
// Call Accounting
// ============================================================================

/// Gateway operations, for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    ResolveQueue,
    CreateQueue,
    SendMessage,
    ReceiveMessages,
    ChangeVisibility,
    DeleteMessage,
    DeleteQueue,
    GetAttributes,
    SetAttributes,
}

const OPERATION_COUNT: usize = 9;

impl GatewayOperation {
    fn index(self) -> usize {
        self as usize
    }
}

// ============================================================================
// InMemoryGateway
// ============================================================================

/// In-process visibility-timeout backend
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
    calls: [AtomicUsize; OPERATION_COUNT],
    failures: Mutex<HashSet<GatewayOperation>>,
    latency: Option<Duration>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            calls: Default::default(),
            failures: Mutex::new(HashSet::new()),
            latency: None,
        }
    }

    /// Delay every operation by `latency` before it touches the store
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of times `operation` has been invoked
    pub fn calls(&self, operation: GatewayOperation) -> usize {
        self.calls[operation.index()].load(Ordering::SeqCst)
    }

    /// Make the next call of `operation` fail with a connection error
    pub fn fail_next(&self, operation: GatewayOperation) {
        lock(&self.failures).insert(operation);
    }

    /// Total messages held by the named queue, visible or not
    pub fn message_count(&self, name: &QueueName) -> usize {
        let state = lock(&self.state);
        state
            .urls
            .get(name)
            .and_then(|url| state.queues.get(url))
            .map(|queue| queue.messages.len())
            .unwrap_or(0)
    }

    async fn enter(&self, operation: GatewayOperation) -> Result<(), QueueError> {
        self.calls[operation.index()].fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if lock(&self.failures).remove(&operation) {
            return Err(QueueError::ConnectionFailed {
                message: format!("injected failure for {:?}", operation),
            });
        }

        Ok(())
    }

    /// One non-blocking receive pass, applying redrive before delivery
    fn try_receive(
        &self,
        queue: &QueueHandle,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = lock(&self.state);
        let now = Instant::now();

        let redrive = state.queue_mut(queue)?.redrive_policy();
        let dead_letter_url = redrive
            .as_ref()
            .and_then(|policy| state.url_for_arn(&policy.dead_letter_target_arn));

        let source = state.queue_mut(queue)?;
        let mut redriven = Vec::new();
        let mut received = Vec::new();
        let mut index = 0;

        while index < source.messages.len() && received.len() < request.max_messages as usize {
            let message = &mut source.messages[index];
            if !message.is_visible(now) {
                index += 1;
                continue;
            }

            let exhausted = match (&redrive, &dead_letter_url) {
                (Some(policy), Some(_)) => message.receive_count >= policy.max_receive_count,
                _ => false,
            };
            if exhausted {
                if let Some(message) = source.messages.remove(index) {
                    redriven.push(message);
                }
                continue;
            }

            message.receive_count += 1;
            message.visible_at = now + request.visibility_timeout;
            let lease = uuid::Uuid::new_v4().to_string();
            message.lease = Some(lease.clone());

            let mut attrs = HashMap::new();
            for name in &request.attribute_names {
                match name.as_str() {
                    attributes::APPROXIMATE_RECEIVE_COUNT => {
                        attrs.insert(name.clone(), message.receive_count.to_string());
                    }
                    attributes::SENT_TIMESTAMP => {
                        attrs.insert(name.clone(), message.sent_at.epoch_millis().to_string());
                    }
                    _ => {}
                }
            }

            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                lease_handle: LeaseHandle::new(lease),
                attributes: attrs,
            });
            index += 1;
        }

        if let Some(url) = dead_letter_url {
            if let Some(target) = state.queues.get_mut(&url) {
                for mut message in redriven {
                    message.receive_count = 0;
                    message.visible_at = now;
                    message.lease = None;
                    target.messages.push_back(message);
                }
            }
        }

        Ok(received)
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl QueueGateway for InMemoryGateway {
    async fn resolve_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError> {
        self.enter(GatewayOperation::ResolveQueue).await?;

        lock(&self.state)
            .urls
            .get(name)
            .map(|url| QueueHandle::new(url.clone()))
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: name.to_string(),
            })
    }

    async fn create_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError> {
        self.enter(GatewayOperation::CreateQueue).await?;

        let mut state = lock(&self.state);
        if let Some(url) = state.urls.get(name) {
            return Ok(QueueHandle::new(url.clone()));
        }

        let url = format!("memory://queues/{}", name);
        let queue = MemoryQueue {
            arn: format!("arn:memory:local:000000000000:{}", name),
            attributes: HashMap::new(),
            messages: VecDeque::new(),
        };
        state.urls.insert(name.clone(), url.clone());
        state.queues.insert(url.clone(), queue);

        Ok(QueueHandle::new(url))
    }

    async fn send_message(
        &self,
        queue: &QueueHandle,
        body: Bytes,
    ) -> Result<MessageId, QueueError> {
        self.enter(GatewayOperation::SendMessage).await?;

        let mut state = lock(&self.state);
        let target = state.queue_mut(queue)?;
        let message = StoredMessage::new(body);
        let id = message.message_id.clone();
        target.messages.push_back(message);

        Ok(id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.enter(GatewayOperation::ReceiveMessages).await?;

        let deadline = Instant::now() + request.wait_time;
        loop {
            let received = self.try_receive(queue, request)?;
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        lease: &LeaseHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.enter(GatewayOperation::ChangeVisibility).await?;

        let mut state = lock(&self.state);
        let target = state.queue_mut(queue)?;
        let index = target.find_lease(lease)?;
        target.messages[index].visible_at = Instant::now() + timeout;

        Ok(())
    }

    async fn delete_message(
        &self,
        queue: &QueueHandle,
        lease: &LeaseHandle,
    ) -> Result<(), QueueError> {
        self.enter(GatewayOperation::DeleteMessage).await?;

        let mut state = lock(&self.state);
        let target = state.queue_mut(queue)?;
        let index = target.find_lease(lease)?;
        target.messages.remove(index);

        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.enter(GatewayOperation::DeleteQueue).await?;

        let mut state = lock(&self.state);
        if state.queues.remove(queue.as_str()).is_none() {
            return Err(QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            });
        }
        state.urls.retain(|_, url| url != queue.as_str());

        Ok(())
    }

    async fn get_attributes(
        &self,
        queue: &QueueHandle,
        names: &[&str],
    ) -> Result<HashMap<String, String>, QueueError> {
        self.enter(GatewayOperation::GetAttributes).await?;

        let mut state = lock(&self.state);
        let target = state.queue_mut(queue)?;
        let now = Instant::now();

        let mut result = HashMap::new();
        for name in names {
            let value = match *name {
                attributes::QUEUE_ARN => Some(target.arn.clone()),
                attributes::APPROXIMATE_NUMBER_OF_MESSAGES => Some(
                    target
                        .messages
                        .iter()
                        .filter(|m| m.is_visible(now))
                        .count()
                        .to_string(),
                ),
                attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE => Some(
                    target
                        .messages
                        .iter()
                        .filter(|m| !m.is_visible(now))
                        .count()
                        .to_string(),
                ),
                other => target.attributes.get(other).cloned(),
            };
            if let Some(value) = value {
                result.insert(name.to_string(), value);
            }
        }

        Ok(result)
    }

    async fn set_attributes(
        &self,
        queue: &QueueHandle,
        values: HashMap<String, String>,
    ) -> Result<(), QueueError> {
        self.enter(GatewayOperation::SetAttributes).await?;

        if let Some(raw) = values.get(attributes::REDRIVE_POLICY) {
            RedrivePolicy::from_attribute(raw).map_err(|e| QueueError::ProviderError {
                provider: "InMemory".to_string(),
                code: "InvalidAttributeValue".to_string(),
                message: e.to_string(),
            })?;
        }

        let mut state = lock(&self.state);
        state.queue_mut(queue)?.attributes.extend(values);

        Ok(())
    }
}
