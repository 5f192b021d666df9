//! Payload codecs.

use crate::error::SerializationError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns a typed payload into message bytes and back
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Bytes, SerializationError>;

    fn deserialize(&self, body: &[u8]) -> Result<T, SerializationError>;
}

/// JSON codec backed by `serde_json`; the default for every queue
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Bytes, SerializationError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, body: &[u8]) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(body)?)
    }
}
