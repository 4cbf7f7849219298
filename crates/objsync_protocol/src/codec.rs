//! Frame codecs.
//!
//! The connection works on JSON trees; a [`Codec`] turns them into the bytes
//! carried by the transport and back.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde_json::Value;

/// Converts between JSON trees and wire bytes.
pub trait Codec: Send + Sync {
    /// Encodes a JSON tree.
    fn serialize(&self, value: &Value) -> ProtocolResult<Bytes>;

    /// Decodes wire bytes into a JSON tree.
    fn deserialize(&self, bytes: &[u8]) -> ProtocolResult<Value>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// UTF-8 JSON text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates a JSON codec.
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn serialize(&self, value: &Value) -> ProtocolResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> ProtocolResult<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::malformed("empty frame"));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_text_frames() {
        let codec = JsonCodec::new();
        let bytes = codec.serialize(&json!({"op": "connected"})).unwrap();
        assert_eq!(&bytes[..], br#"{"op":"connected"}"#);
        assert_eq!(codec.deserialize(&bytes).unwrap(), json!({"op": "connected"}));
    }

    #[test]
    fn rejects_garbage() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.deserialize(b"{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(codec.deserialize(b"  "), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn usable_as_trait_object() {
        let codec: Box<dyn Codec> = Box::new(JsonCodec);
        assert_eq!(codec.name(), "json");
    }
}
