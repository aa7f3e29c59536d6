//! Payload serializer seam.

use serde_json::Value;

/// Encodes and decodes message payloads.
///
/// Stream handlers decode message bodies through the serializer configured
/// at registration; JSON is the default everywhere.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, serde_json::Error>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, serde_json::Error>;
}

/// The default JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let serializer = JsonSerializer;
        let value = json!({
            "id": 7,
            "tags": ["a", "b"],
            "nested": {"pi": 3.5, "ok": true, "none": null},
        });

        let bytes = serializer.serialize(&value).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(JsonSerializer.deserialize(b"not json").is_err());
    }
}
