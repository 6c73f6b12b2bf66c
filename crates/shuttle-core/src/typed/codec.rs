//! PayloadCodec - job arguments to bytes and back.
//!
//! Arguments pass through `serde_json::Value` on their way to and from the
//! codec, which keeps the codec object-safe. The engine and every `JobRef`
//! it hands out share one codec, so enqueue and execute always agree on the
//! format.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait PayloadCodec: Send + Sync {
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode_value(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

impl<'a> dyn PayloadCodec + 'a {
    pub fn encode<T: Serialize + ?Sized>(&self, args: &T) -> Result<Vec<u8>, CodecError> {
        self.encode_value(&serde_json::to_value(args)?)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_value(self.decode_value(bytes)?)?)
    }
}

/// Compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
