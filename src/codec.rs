//! Payload codecs.
//!
//! The log stores opaque byte payloads; a [`Codec`] turns queue elements
//! into those bytes and back. Changing the codec of an existing log is the
//! caller's responsibility: the log carries no schema or version tag.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::QueueError;

pub trait Codec<T>: Send + Sync {
    fn encode(&self, item: &T) -> Result<Vec<u8>, QueueError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, QueueError>;
}

/// serde + bincode, for any serializable element type.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, item: &T) -> Result<Vec<u8>, QueueError> {
        bincode::serialize(item).map_err(|e| QueueError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, QueueError> {
        bincode::deserialize(bytes).map_err(|e| QueueError::Codec(e.to_string()))
    }
}

/// Strings stored as raw UTF-8.
#[derive(Default, Clone, Copy)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, item: &String) -> Result<Vec<u8>, QueueError> {
        Ok(item.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, QueueError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| QueueError::Codec("Payload is not valid UTF-8".to_string()))
    }
}

/// Identity codec for byte payloads.
#[derive(Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, item: &Vec<u8>) -> Result<Vec<u8>, QueueError> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, QueueError> {
        Ok(bytes.to_vec())
    }
}
