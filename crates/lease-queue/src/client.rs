//! The queue client: publish, lease-based consume, and queue lifecycle.

use crate::bootstrap::QueueBootstrap;
use crate::entry::{EntryState, QueueEntry};
use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::gateway::QueueGateway;
use crate::hooks::QueueHooks;
use crate::message::{
    attributes, LeaseHandle, MessageId, QueueHandle, ReceiveRequest, ReceivedMessage, Timestamp,
};
use crate::options::{LeaseQueueSettings, QueueOptions, SqsConnection};
use crate::providers::SqsGateway;
use crate::serializer::{JsonSerializer, Serializer};
use crate::stats::{parse_count, QueueCounters, QueueStats};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Generic work queue interface
#[async_trait]
pub trait WorkQueue<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Publish a payload. Returns `None` when a hook vetoed it.
    async fn enqueue(&self, value: T) -> Result<Option<MessageId>, QueueError>;

    /// Receive one entry, polling until one arrives or `cancel` fires.
    ///
    /// With an already-cancelled token a single non-blocking receive is made.
    async fn dequeue(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueEntry<T>>, QueueError>;

    /// Extend the entry's invisibility window by the full lease duration
    async fn renew_lease(&self, entry: &QueueEntry<T>) -> Result<(), QueueError>;

    /// Delete the message; the entry becomes [`EntryState::Completed`]
    async fn complete(&self, entry: &QueueEntry<T>) -> Result<(), QueueError>;

    /// Release the message for redelivery; the entry becomes [`EntryState::Abandoned`]
    async fn abandon(&self, entry: &QueueEntry<T>) -> Result<(), QueueError>;

    async fn get_stats(&self) -> Result<QueueStats, QueueError>;

    /// Delete the queue and its dead-letter queue and reset local counters
    async fn delete_queue(&self) -> Result<(), QueueError>;
}

pub(crate) struct QueueInner<T: Send + Sync + 'static> {
    /// Identity stamped on every entry this client produces
    pub(crate) id: Uuid,
    pub(crate) options: QueueOptions,
    gateway: OnceCell<Arc<dyn QueueGateway>>,
    connection: Option<SqsConnection>,
    serializer: Arc<dyn Serializer<T>>,
    hooks: Vec<Arc<dyn QueueHooks<T>>>,
    bootstrap: QueueBootstrap,
    pub(crate) counters: QueueCounters,
}

/// Visibility-timeout work queue client.
///
/// Cloning is cheap and every clone shares the same gateway, bootstrap state
/// and counters.
///
/// ```no_run
/// use lease_queue::{LeaseQueue, QueueOptions, SqsConnection, WorkQueue};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = QueueOptions::new("orders".parse()?);
/// let queue: LeaseQueue<serde_json::Value> = LeaseQueue::builder(options)
///     .sqs(SqsConnection::default().with_env_credentials())
///     .build()?;
///
/// queue.enqueue(serde_json::json!({"id": 1})).await?;
/// if let Some(entry) = queue.dequeue(&CancellationToken::new()).await? {
///     queue.complete(&entry).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct LeaseQueue<T: Send + Sync + 'static> {
    pub(crate) inner: Arc<QueueInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for LeaseQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for LeaseQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseQueue")
            .field("id", &self.inner.id)
            .field("queue", &self.inner.options.name)
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

impl<T> LeaseQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builder using the JSON codec
    pub fn builder(options: QueueOptions) -> LeaseQueueBuilder<T> {
        LeaseQueueBuilder::with_serializer(options, Arc::new(JsonSerializer))
    }

    /// JSON client talking to SQS as described by loaded settings
    pub fn from_settings(settings: LeaseQueueSettings) -> Result<Self, QueueError> {
        Self::builder(settings.queue).sqs(settings.sqs).build()
    }
}

impl<T> LeaseQueue<T>
where
    T: Send + Sync + 'static,
{
    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    /// Gateway in use, built from the SQS connection on first call
    async fn gateway(&self) -> Result<&Arc<dyn QueueGateway>, QueueError> {
        self.inner
            .gateway
            .get_or_try_init(|| async {
                let connection =
                    self.inner
                        .connection
                        .as_ref()
                        .ok_or_else(|| ConfigurationError::Missing {
                            key: "sqs".to_string(),
                        })?;
                let gateway = SqsGateway::new(connection).map_err(|e| e.to_queue_error())?;
                Ok::<_, QueueError>(Arc::new(gateway) as Arc<dyn QueueGateway>)
            })
            .await
    }

    async fn ready(&self) -> Result<(&Arc<dyn QueueGateway>, QueueHandle), QueueError> {
        let gateway = self.gateway().await?;
        let queue = self
            .inner
            .bootstrap
            .ensure_queue_ready(gateway.as_ref())
            .await?;
        Ok((gateway, queue))
    }

    /// Ownership and state checks shared by the lease operations; no remote calls
    fn check_lease<'a>(&self, entry: &'a QueueEntry<T>) -> Result<&'a LeaseHandle, QueueError> {
        if entry.queue_id() != self.inner.id {
            return Err(QueueError::ForeignEntry {
                message_id: entry.id().to_string(),
            });
        }

        let lease = entry.lease_handle().ok_or_else(|| ValidationError::Required {
            field: "lease_handle".to_string(),
        })?;
        entry.ensure_active()?;

        Ok(lease)
    }

    async fn receive_once(
        &self,
        gateway: &dyn QueueGateway,
        queue: &QueueHandle,
        request: &ReceiveRequest,
        token: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        tokio::select! {
            biased;
            result = gateway.receive_messages(queue, request) => {
                Ok(result?.into_iter().next())
            }
            _ = token.cancelled() => Ok(None),
        }
    }

    async fn accept(&self, message: ReceivedMessage) -> Result<QueueEntry<T>, QueueError> {
        self.inner.counters.record_dequeued();

        let enqueued_at = message.sent_at().unwrap_or_else(Timestamp::now);
        let attempt = message.receive_count().unwrap_or(1);
        let value = self.inner.serializer.deserialize(&message.body)?;

        let entry = QueueEntry::new(
            self.inner.id,
            message.message_id,
            value,
            Some(message.lease_handle),
            enqueued_at,
            attempt,
        );

        debug!(message_id = %entry.id(), attempt, "Dequeued entry");
        for hook in &self.inner.hooks {
            hook.on_dequeued(&entry).await;
        }

        Ok(entry)
    }
}

#[async_trait]
impl<T> WorkQueue<T> for LeaseQueue<T>
where
    T: Send + Sync + 'static,
{
    #[instrument(skip_all, fields(queue = %self.inner.options.name))]
    async fn enqueue(&self, value: T) -> Result<Option<MessageId>, QueueError> {
        for hook in &self.inner.hooks {
            if !hook.on_enqueuing(&value).await {
                debug!("Enqueue vetoed by hook");
                return Ok(None);
            }
        }

        let body = self.inner.serializer.serialize(&value)?;
        let (gateway, queue) = self.ready().await?;
        let id = gateway.send_message(&queue, body).await?;
        self.inner.counters.record_enqueued();

        let entry = QueueEntry::new(self.inner.id, id.clone(), value, None, Timestamp::now(), 0);
        debug!(message_id = %id, "Enqueued entry");
        for hook in &self.inner.hooks {
            hook.on_enqueued(&entry).await;
        }

        Ok(Some(id))
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name))]
    async fn dequeue(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueEntry<T>>, QueueError> {
        let (gateway, queue) = self.ready().await?;
        let options = &self.inner.options;

        // A cancelled caller still gets whatever is immediately available
        let inert = CancellationToken::new();
        let (token, wait) = if cancel.is_cancelled() {
            (&inert, Duration::ZERO)
        } else {
            (cancel, options.read_queue_timeout)
        };
        let request = ReceiveRequest::single(options.work_item_timeout, wait);

        loop {
            if let Some(message) = self
                .receive_once(gateway.as_ref(), &queue, &request, token)
                .await?
            {
                return self.accept(message).await.map(Some);
            }

            if cancel.is_cancelled() {
                return Ok(None);
            }

            tokio::select! {
                _ = tokio::time::sleep(options.dequeue_interval) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name, message_id = %entry.id()))]
    async fn renew_lease(&self, entry: &QueueEntry<T>) -> Result<(), QueueError> {
        let lease = self.check_lease(entry)?;
        let (gateway, queue) = self.ready().await?;

        gateway
            .change_visibility(&queue, lease, self.inner.options.work_item_timeout)
            .await?;

        debug!("Lease renewed");
        Ok(())
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name, message_id = %entry.id()))]
    async fn complete(&self, entry: &QueueEntry<T>) -> Result<(), QueueError> {
        let lease = self.check_lease(entry)?;
        let (gateway, queue) = self.ready().await?;

        entry.transition(EntryState::Completed)?;
        if let Err(e) = gateway.delete_message(&queue, lease).await {
            entry.release(EntryState::Completed);
            return Err(e);
        }
        self.inner.counters.record_completed();

        debug!("Entry completed");
        for hook in &self.inner.hooks {
            hook.on_completed(entry).await;
        }

        Ok(())
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name, message_id = %entry.id()))]
    async fn abandon(&self, entry: &QueueEntry<T>) -> Result<(), QueueError> {
        let lease = self.check_lease(entry)?;
        let (gateway, queue) = self.ready().await?;

        entry.transition(EntryState::Abandoned)?;
        // Redelivery waits out a full lease window; redrive is left to the backend
        if let Err(e) = gateway
            .change_visibility(&queue, lease, self.inner.options.work_item_timeout)
            .await
        {
            entry.release(EntryState::Abandoned);
            return Err(e);
        }
        self.inner.counters.record_abandoned();

        debug!("Entry abandoned");
        for hook in &self.inner.hooks {
            hook.on_abandoned(entry).await;
        }

        Ok(())
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name))]
    async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        let (gateway, queue) = self.ready().await?;

        let depth = gateway
            .get_attributes(
                &queue,
                &[
                    attributes::APPROXIMATE_NUMBER_OF_MESSAGES,
                    attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE,
                ],
            )
            .await?;

        let mut stats = self.inner.counters.snapshot();
        stats.queued = parse_count(depth.get(attributes::APPROXIMATE_NUMBER_OF_MESSAGES));
        stats.working =
            parse_count(depth.get(attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE));

        if let Some(dead_letter) = self
            .inner
            .bootstrap
            .resolve_dead_letter(gateway.as_ref(), &queue)
            .await
        {
            let depth = gateway
                .get_attributes(&dead_letter, &[attributes::APPROXIMATE_NUMBER_OF_MESSAGES])
                .await?;
            stats.deadletter = parse_count(depth.get(attributes::APPROXIMATE_NUMBER_OF_MESSAGES));
        }

        Ok(stats)
    }

    #[instrument(skip_all, fields(queue = %self.inner.options.name))]
    async fn delete_queue(&self) -> Result<(), QueueError> {
        let result = match self.gateway().await {
            Ok(gateway) => self.inner.bootstrap.teardown(gateway.as_ref()).await,
            Err(e) => Err(e),
        };

        // Local counters reset even when a remote deletion failed
        self.inner.counters.reset();
        info!(ok = result.is_ok(), "Queue deleted and counters reset");

        result
    }
}

/// Builder for [`LeaseQueue`]
pub struct LeaseQueueBuilder<T: Send + Sync + 'static> {
    options: QueueOptions,
    gateway: Option<Arc<dyn QueueGateway>>,
    connection: Option<SqsConnection>,
    serializer: Arc<dyn Serializer<T>>,
    hooks: Vec<Arc<dyn QueueHooks<T>>>,
}

impl<T> LeaseQueueBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Builder with an explicit payload codec
    pub fn with_serializer(options: QueueOptions, serializer: Arc<dyn Serializer<T>>) -> Self {
        Self {
            options,
            gateway: None,
            connection: None,
            serializer,
            hooks: Vec::new(),
        }
    }

    /// Use an already constructed gateway
    pub fn gateway(mut self, gateway: Arc<dyn QueueGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Build an [`SqsGateway`] from `connection` on first use
    pub fn sqs(mut self, connection: SqsConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer<T>>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Register lifecycle hooks; hooks run in registration order
    pub fn hooks(mut self, hooks: Arc<dyn QueueHooks<T>>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn build(self) -> Result<LeaseQueue<T>, QueueError> {
        self.options.validate()?;

        if self.gateway.is_none() && self.connection.is_none() {
            return Err(ConfigurationError::Missing {
                key: "gateway".to_string(),
            }
            .into());
        }

        let bootstrap = QueueBootstrap::new(&self.options);

        Ok(LeaseQueue {
            inner: Arc::new(QueueInner {
                id: Uuid::new_v4(),
                options: self.options,
                gateway: OnceCell::new_with(self.gateway),
                connection: self.connection,
                serializer: self.serializer,
                hooks: self.hooks,
                bootstrap,
                counters: QueueCounters::new(),
            }),
        })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
