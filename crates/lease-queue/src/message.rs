//! Message types exchanged with the remote queue, including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Queue attribute names understood by visibility-timeout backends.
pub mod attributes {
    pub const QUEUE_ARN: &str = "QueueArn";
    pub const REDRIVE_POLICY: &str = "RedrivePolicy";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE: &str =
        "ApproximateNumberOfMessagesNotVisible";

    // Per-message system attributes
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    pub const SENT_TIMESTAMP: &str = "SentTimestamp";
}

/// Suffix appended to a queue name to form its dead-letter counterpart
pub const DEAD_LETTER_SUFFIX: &str = "-deadletter";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Maximum queue name length accepted by SQS
    pub const MAX_LEN: usize = 80;

    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > Self::MAX_LEN {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LEN),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Name of the dead-letter queue paired with this queue
    pub fn dead_letter(&self) -> Result<Self, ValidationError> {
        Self::new(format!("{}{}", self.0, DEAD_LETTER_SUFFIX))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Backend-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token scoped to one delivery of a message.
///
/// Required to delete the message or change its visibility. A redelivered
/// message keeps its [`MessageId`] but receives a fresh lease handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseHandle(String);

impl LeaseHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Lease tokens are long; keep logs readable
        let shown: String = self.0.chars().take(16).collect();
        if shown.len() < self.0.len() {
            write!(f, "{}...", shown)
        } else {
            write!(f, "{}", shown)
        }
    }
}

/// Opaque address of a resolved queue (the queue URL for SQS)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle(String);

impl QueueHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from milliseconds since the Unix epoch
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch
    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// A message delivered by the backend, still in its encoded form
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub lease_handle: LeaseHandle,
    pub attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    /// Delivery attempt reported by the backend, if it attached one
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(attributes::APPROXIMATE_RECEIVE_COUNT)
            .and_then(|v| v.parse().ok())
    }

    /// Time the message was originally sent, if the backend attached it
    pub fn sent_at(&self) -> Option<Timestamp> {
        self.attributes
            .get(attributes::SENT_TIMESTAMP)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(Timestamp::from_epoch_millis)
    }
}

/// Parameters of a single receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Maximum number of messages to return
    pub max_messages: u32,
    /// Invisibility window applied to each returned message
    pub visibility_timeout: Duration,
    /// Long-poll wait; zero returns immediately
    pub wait_time: Duration,
    /// Per-message system attributes to attach
    pub attribute_names: Vec<String>,
}

impl ReceiveRequest {
    /// Request for exactly one message with delivery metadata attached
    pub fn single(visibility_timeout: Duration, wait_time: Duration) -> Self {
        Self {
            max_messages: 1,
            visibility_timeout,
            wait_time,
            attribute_names: vec![
                attributes::APPROXIMATE_RECEIVE_COUNT.to_string(),
                attributes::SENT_TIMESTAMP.to_string(),
            ],
        }
    }
}

/// Backend rule routing messages to a dead-letter queue after repeated delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    #[serde(deserialize_with = "number_or_string")]
    pub max_receive_count: u32,
    pub dead_letter_target_arn: String,
}

impl RedrivePolicy {
    pub fn new(max_receive_count: u32, dead_letter_target_arn: impl Into<String>) -> Self {
        Self {
            max_receive_count,
            dead_letter_target_arn: dead_letter_target_arn.into(),
        }
    }

    /// Encode as the JSON string stored in the queue attribute
    pub fn to_attribute(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from the queue attribute value
    pub fn from_attribute(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }

    /// Queue name at the end of the target ARN (`arn:aws:sqs:region:account:name`)
    pub fn dead_letter_queue_name(&self) -> Option<&str> {
        self.dead_letter_target_arn
            .rsplit(':')
            .next()
            .filter(|name| !name.is_empty())
    }
}

// SQS reports maxReceiveCount back as a string even when it was set as a number
fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
