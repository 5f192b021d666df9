//! Queue and connection configuration.
//!
//! Settings are read through the `config` crate. Sources are applied in order,
//! later ones overriding earlier ones:
//!
//! 1. an optional file (YAML, TOML or JSON, picked by extension)
//! 2. environment variables prefixed `LEASE_QUEUE` with `__` as the separator,
//!    e.g. `LEASE_QUEUE__QUEUE__NAME=orders` or `LEASE_QUEUE__SQS__REGION=eu-west-1`
//!
//! Durations accept an integer number of seconds or a string with a unit
//! suffix (`250ms`, `30s`, `5m`, `1h`).

use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::message::QueueName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "LEASE_QUEUE";

/// Behaviour of a single logical queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Logical queue name
    pub name: QueueName,

    /// Create the queue (and its dead-letter queue) when it does not exist
    #[serde(default = "default_true")]
    pub can_create_queue: bool,

    /// Lease duration applied on receive, renew and abandon
    #[serde(default = "default_work_item_timeout", with = "duration_serde")]
    pub work_item_timeout: Duration,

    /// Long-poll wait for each receive call
    #[serde(default = "default_read_queue_timeout", with = "duration_serde")]
    pub read_queue_timeout: Duration,

    /// Pause between empty receives while dequeuing
    #[serde(default = "default_dequeue_interval", with = "duration_serde")]
    pub dequeue_interval: Duration,

    /// Provision a dead-letter queue and report its depth
    #[serde(default = "default_true")]
    pub support_dead_letter: bool,

    /// Deliveries after which the backend redrives a message to the dead-letter queue
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_work_item_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_read_queue_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_dequeue_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_receive_count() -> u32 {
    3
}

impl QueueOptions {
    /// Options for `name` with every other setting at its default
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            can_create_queue: default_true(),
            work_item_timeout: default_work_item_timeout(),
            read_queue_timeout: default_read_queue_timeout(),
            dequeue_interval: default_dequeue_interval(),
            support_dead_letter: default_true(),
            max_receive_count: default_max_receive_count(),
        }
    }

    pub fn with_can_create_queue(mut self, can_create: bool) -> Self {
        self.can_create_queue = can_create;
        self
    }

    pub fn with_work_item_timeout(mut self, timeout: Duration) -> Self {
        self.work_item_timeout = timeout;
        self
    }

    pub fn with_read_queue_timeout(mut self, timeout: Duration) -> Self {
        self.read_queue_timeout = timeout;
        self
    }

    pub fn with_dequeue_interval(mut self, interval: Duration) -> Self {
        self.dequeue_interval = interval;
        self
    }

    pub fn with_dead_letter(mut self, enabled: bool, max_receive_count: u32) -> Self {
        self.support_dead_letter = enabled;
        self.max_receive_count = max_receive_count;
        self
    }

    /// Reject settings the backend cannot honour
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.work_item_timeout.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "work_item_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.support_dead_letter {
            if self.max_receive_count == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "max_receive_count".to_string(),
                    message: "must be at least 1 when dead-lettering is enabled".to_string(),
                });
            }
            self.name.dead_letter()?;
        }

        Ok(())
    }
}

/// Connection details for the SQS gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqsConnection {
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for SqsConnection {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl SqsConnection {
    /// Fill missing credentials from the standard AWS environment variables
    pub fn with_env_credentials(mut self) -> Self {
        if self.access_key_id.is_none() {
            self.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        }
        self
    }
}

/// Complete settings document: queue behaviour plus SQS connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseQueueSettings {
    pub queue: QueueOptions,

    #[serde(default)]
    pub sqs: SqsConnection,
}

impl LeaseQueueSettings {
    /// Load settings from an optional file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, QueueError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading queue settings from file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(ConfigurationError::from)?;

        settings.queue.validate()?;

        Ok(Self {
            queue: settings.queue,
            sqs: settings.sqs.with_env_credentials(),
        })
    }
}

/// Serde adapter for durations written as seconds or unit-suffixed strings
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    /// Parse `250ms`, `30s`, `5m`, `1h` or a bare number of seconds
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", text))?;

        let seconds_per_unit = match unit.trim() {
            "ms" => return Ok(Duration::from_millis(value)),
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, text)),
        };

        value
            .checked_mul(seconds_per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", text))
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
