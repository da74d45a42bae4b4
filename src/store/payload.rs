//! Payload codec seam between opaque payload values and persisted bytes.

use serde_json::Value;

use super::errors::{StoreError, StoreResult};

/// Serializer consumed by durable backends.
///
/// The engine never interprets payloads; a backend that persists bytes
/// runs them through a codec and stores the codec tag alongside every
/// record, so a reopened store can refuse data it cannot decode.
pub trait PayloadCodec: Send + Sync {
    /// Tag persisted with every record this codec encodes.
    fn tag(&self) -> &str;

    fn encode(&self, payload: &Value) -> StoreResult<Vec<u8>>;

    /// Decode `bytes` persisted under `tag`. Must fail with
    /// [`StoreError::UnknownCodec`] for tags it does not own.
    fn decode(&self, bytes: &[u8], tag: &str) -> StoreResult<Value>;
}

/// Default codec: compact JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn tag(&self) -> &str {
        "json"
    }

    fn encode(&self, payload: &Value) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn decode(&self, bytes: &[u8], tag: &str) -> StoreResult<Value> {
        if tag != self.tag() {
            return Err(StoreError::UnknownCodec(tag.to_string()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
