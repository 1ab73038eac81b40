//! Envelope (de)serialization & wire-type resolution (C8, spec.md §4.8,
//! §9 "reflection-driven type resolution" redesign).
//!
//! JSON is the canonical wire format. The canonical form (keys sorted
//! recursively) reuses the teacher's `canonicalize_json`/`sort_keys`
//! pattern from `mqk-config`/`mqk-audit`, needed here wherever two
//! envelopes must compare byte-for-byte (tests, dedup hashing).
//! `WireTypeRegistry` replaces runtime reflection with a startup-time
//! `type_id → decoder` map; unknown type ids produce `SerializationError`.

use std::any::Any;
use std::collections::HashMap;

use serde_json::Value;
use wcf_types::MessageEnvelope;

/// Malformed envelope or unknown type id (spec.md §7 error taxonomy). Rows
/// hitting this are marked failed with descriptive text; recovery is an
/// operator action (fix types, then skip or re-enqueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    MalformedEnvelope(String),
    UnknownTypeId(String),
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedEnvelope(msg) => write!(f, "malformed envelope: {msg}"),
            Self::UnknownTypeId(type_id) => write!(f, "unknown wire type id: {type_id}"),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Recursively sorts object keys so two semantically-equal JSON values
/// serialize to identical bytes.
pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

pub fn canonicalize_json(v: &Value) -> String {
    serde_json::to_string(&sort_keys(v)).expect("sorted JSON value always serializes")
}

/// Serializes an envelope to its canonical wire bytes.
pub fn to_wire_bytes(envelope: &MessageEnvelope) -> Result<Vec<u8>, SerializationError> {
    let value = serde_json::to_value(envelope).map_err(|e| SerializationError::MalformedEnvelope(e.to_string()))?;
    Ok(canonicalize_json(&value).into_bytes())
}

/// Deserializes wire bytes back into an envelope.
pub fn from_wire_bytes(bytes: &[u8]) -> Result<MessageEnvelope, SerializationError> {
    serde_json::from_slice(bytes).map_err(|e| SerializationError::MalformedEnvelope(e.to_string()))
}

/// A decoder for one wire type id: turns a raw JSON payload into the boxed
/// concrete type a registered perspective/receptor/consumer handler expects.
pub type DecodeFn = fn(&Value) -> Result<Box<dyn Any + Send>, SerializationError>;

/// Startup-time `type_id → decoder` map (spec.md §9). Populated once, then
/// read-only for the lifetime of the process — no runtime reflection.
#[derive(Default)]
pub struct WireTypeRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl WireTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_id: impl Into<String>, decoder: DecodeFn) {
        self.decoders.insert(type_id.into(), decoder);
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.decoders.contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode `payload` as `type_id`. Unknown type ids are a
    /// `SerializationError`, not a panic — the caller marks the row failed
    /// and waits on operator intervention (spec.md §7).
    pub fn decode(&self, type_id: &str, payload: &Value) -> Result<Box<dyn Any + Send>, SerializationError> {
        let decoder = self
            .decoders
            .get(type_id)
            .ok_or_else(|| SerializationError::UnknownTypeId(type_id.to_string()))?;
        decoder(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_json_is_key_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
    }

    #[test]
    fn wire_roundtrip_preserves_envelope() {
        let envelope = MessageEnvelope::new(uuid::Uuid::new_v4(), serde_json::json!({"x": 1}));
        let bytes = to_wire_bytes(&envelope).unwrap();
        let decoded = from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded.message_id, envelope.message_id);
    }

    #[test]
    fn unknown_type_id_is_serialization_error_not_panic() {
        let registry = WireTypeRegistry::new();
        let err = registry.decode("NoSuchType", &Value::Null).unwrap_err();
        assert_eq!(err, SerializationError::UnknownTypeId("NoSuchType".to_string()));
    }

    #[test]
    fn registered_decoder_is_invoked() {
        fn decode_unit(_v: &Value) -> Result<Box<dyn Any + Send>, SerializationError> {
            Ok(Box::new(()))
        }
        let mut registry = WireTypeRegistry::new();
        registry.register("Unit", decode_unit as DecodeFn);
        assert!(registry.contains("Unit"));
        assert!(registry.decode("Unit", &Value::Null).is_ok());
    }
}
