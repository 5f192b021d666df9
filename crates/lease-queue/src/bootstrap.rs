//! Queue existence bootstrapping and dead-letter provisioning.

use crate::error::{QueueError, SerializationError};
use crate::gateway::QueueGateway;
use crate::message::{attributes, QueueHandle, QueueName, RedrivePolicy};
use crate::options::QueueOptions;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Resolves (and when allowed, creates) the primary queue exactly once.
///
/// Concurrent callers share one resolution: the first caller takes the
/// bootstrap mutex and talks to the backend, later callers find the cached
/// handle after the re-check. Handles are only written under the mutex and are
/// cleared again by [`teardown`](Self::teardown).
pub struct QueueBootstrap {
    name: QueueName,
    can_create_queue: bool,
    /// `max_receive_count` when dead-lettering is enabled
    dead_letter: Option<u32>,
    queue: RwLock<Option<QueueHandle>>,
    dead_letter_queue: RwLock<Option<QueueHandle>>,
    lock: Mutex<()>,
}

impl QueueBootstrap {
    pub fn new(options: &QueueOptions) -> Self {
        Self {
            name: options.name.clone(),
            can_create_queue: options.can_create_queue,
            dead_letter: options
                .support_dead_letter
                .then_some(options.max_receive_count),
            queue: RwLock::new(None),
            dead_letter_queue: RwLock::new(None),
            lock: Mutex::new(()),
        }
    }

    /// Cached primary handle, if bootstrap has run
    pub fn queue_handle(&self) -> Option<QueueHandle> {
        read(&self.queue).clone()
    }

    /// Cached dead-letter handle, if it has been created or discovered
    pub fn dead_letter_handle(&self) -> Option<QueueHandle> {
        read(&self.dead_letter_queue).clone()
    }

    /// Return the primary queue handle, resolving or creating the queue on first use
    #[instrument(skip_all, fields(queue = %self.name))]
    pub async fn ensure_queue_ready(
        &self,
        gateway: &dyn QueueGateway,
    ) -> Result<QueueHandle, QueueError> {
        if let Some(handle) = self.queue_handle() {
            return Ok(handle);
        }

        let _guard = self.lock.lock().await;
        if let Some(handle) = self.queue_handle() {
            return Ok(handle);
        }

        let handle = match gateway.resolve_queue(&self.name).await {
            Ok(handle) => handle,
            Err(QueueError::QueueNotFound { .. }) if self.can_create_queue => {
                self.create(gateway).await?
            }
            Err(e) => return Err(e),
        };

        debug!(handle = %handle, "Queue ready");
        *write(&self.queue) = Some(handle.clone());
        Ok(handle)
    }

    async fn create(&self, gateway: &dyn QueueGateway) -> Result<QueueHandle, QueueError> {
        let Some(max_receive_count) = self.dead_letter else {
            info!("Creating queue");
            return create_or_resolve(gateway, &self.name).await;
        };

        let dead_letter_name = self.name.dead_letter()?;
        info!(dead_letter = %dead_letter_name, "Creating queue with dead-letter queue");

        let dead_letter = create_or_resolve(gateway, &dead_letter_name).await?;
        let arn = gateway
            .get_attributes(&dead_letter, &[attributes::QUEUE_ARN])
            .await?
            .remove(attributes::QUEUE_ARN)
            .ok_or_else(|| QueueError::ProviderError {
                provider: "gateway".to_string(),
                code: "MissingAttribute".to_string(),
                message: format!("{} has no {}", dead_letter_name, attributes::QUEUE_ARN),
            })?;

        let handle = create_or_resolve(gateway, &self.name).await?;

        let policy = RedrivePolicy::new(max_receive_count, arn)
            .to_attribute()
            .map_err(SerializationError::from)?;
        gateway
            .set_attributes(
                &handle,
                HashMap::from([(attributes::REDRIVE_POLICY.to_string(), policy)]),
            )
            .await?;

        *write(&self.dead_letter_queue) = Some(dead_letter);
        Ok(handle)
    }

    /// Dead-letter handle for `primary`, discovered from its redrive policy
    /// when not cached. Resolution failures are logged and yield `None` so
    /// the next call tries again.
    pub async fn resolve_dead_letter(
        &self,
        gateway: &dyn QueueGateway,
        primary: &QueueHandle,
    ) -> Option<QueueHandle> {
        if self.dead_letter.is_none() {
            return None;
        }
        if let Some(handle) = self.dead_letter_handle() {
            return Some(handle);
        }

        let _guard = self.lock.lock().await;
        if let Some(handle) = self.dead_letter_handle() {
            return Some(handle);
        }

        match discover_dead_letter(gateway, primary).await {
            Ok(Some(handle)) => {
                *write(&self.dead_letter_queue) = Some(handle.clone());
                Some(handle)
            }
            Ok(None) => {
                debug!(queue = %self.name, "Queue has no redrive policy");
                None
            }
            Err(e) => {
                warn!(queue = %self.name, error = %e, "Failed to resolve dead-letter queue");
                None
            }
        }
    }

    /// Delete the primary queue and its dead-letter queue, then forget both
    /// handles. Both deletions are attempted; the first error is returned.
    #[instrument(skip_all, fields(queue = %self.name))]
    pub async fn teardown(&self, gateway: &dyn QueueGateway) -> Result<(), QueueError> {
        let primary = match self.queue_handle() {
            Some(handle) => Some(handle),
            None => match gateway.resolve_queue(&self.name).await {
                Ok(handle) => Some(handle),
                Err(QueueError::QueueNotFound { .. }) => None,
                Err(e) => {
                    self.clear().await;
                    return Err(e);
                }
            },
        };

        let dead_letter = match &primary {
            Some(handle) => self.resolve_dead_letter(gateway, handle).await,
            None => self.dead_letter_handle(),
        };

        let mut first_error = None;
        for handle in primary.iter().chain(dead_letter.iter()) {
            if let Err(e) = gateway.delete_queue(handle).await {
                warn!(handle = %handle, error = %e, "Failed to delete queue");
                first_error.get_or_insert(e);
            }
        }

        self.clear().await;
        info!("Queue deleted");
        first_error.map_or(Ok(()), Err)
    }

    async fn clear(&self) {
        let _guard = self.lock.lock().await;
        *write(&self.queue) = None;
        *write(&self.dead_letter_queue) = None;
    }
}

async fn create_or_resolve(
    gateway: &dyn QueueGateway,
    name: &QueueName,
) -> Result<QueueHandle, QueueError> {
    match gateway.create_queue(name).await {
        // Another process created it first
        Err(QueueError::QueueAlreadyExists { .. }) => gateway.resolve_queue(name).await,
        other => other,
    }
}

async fn discover_dead_letter(
    gateway: &dyn QueueGateway,
    primary: &QueueHandle,
) -> Result<Option<QueueHandle>, QueueError> {
    let Some(raw) = gateway
        .get_attributes(primary, &[attributes::REDRIVE_POLICY])
        .await?
        .remove(attributes::REDRIVE_POLICY)
    else {
        return Ok(None);
    };

    let policy = RedrivePolicy::from_attribute(&raw).map_err(SerializationError::from)?;
    let Some(name) = policy.dead_letter_queue_name() else {
        return Ok(None);
    };

    let name = QueueName::new(name.to_string())?;
    gateway.resolve_queue(&name).await.map(Some)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
