//! Wire encoding of messages and pairing payloads.
//!
//! The default [`WireFormat::Checksum`] encodes the JSON text with base58check, so a corrupted or truncated message is
//! detected before any JSON parsing happens. [`WireFormat::PlainJson`] sends the JSON text as-is.
//!
//! Before encoding, integers outside the range a double can represent exactly (±(2^53 − 1)) are rewritten as decimal
//! strings, because peers written in languages with double-only numbers would silently lose precision otherwise.
//! Within that range `serialize` → `deserialize` is the identity.

use crate::errors::SerializerError;
use crate::messages::BeaconMessage;
use crate::migration::migrate_message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// 2^53 − 1
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Checksum,
    PlainJson,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn serialize<T: Serialize>(&self, message: &T) -> Result<String, SerializerError> {
        let mut value = serde_json::to_value(message)?;
        normalize_numbers(&mut value);
        let json = serde_json::to_string(&value)?;
        let encoded = match self.format {
            WireFormat::Checksum => bs58::encode(json.as_bytes()).with_check().into_string(),
            WireFormat::PlainJson => json,
        };
        Ok(encoded)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Result<T, SerializerError> {
        let value = self.decode_value(text)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decodes a [`BeaconMessage`], rewriting legacy field names on the way in.
    pub fn deserialize_message(&self, text: &str) -> Result<BeaconMessage, SerializerError> {
        let mut value = self.decode_value(text)?;
        migrate_message(&mut value);
        Ok(serde_json::from_value(value)?)
    }

    fn decode_value(&self, text: &str) -> Result<Value, SerializerError> {
        let json = match self.format {
            WireFormat::Checksum => {
                let bytes = bs58::decode(text.trim()).with_check(None).into_vec()?;
                String::from_utf8(bytes)?
            }
            WireFormat::PlainJson => text.to_string(),
        };
        Ok(serde_json::from_str(&json)?)
    }
}

/// Replaces every integer whose magnitude exceeds [`MAX_SAFE_INTEGER`] with its decimal string.
pub fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(n) => {
            let unsafe_int = match (n.as_u64(), n.as_i64()) {
                (Some(u), _) => u > MAX_SAFE_INTEGER,
                (None, Some(i)) => i.unsigned_abs() > MAX_SAFE_INTEGER,
                (None, None) => false,
            };
            if unsafe_int {
                *value = Value::String(n.to_string());
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::{MessagePayload, OperationRequest};
    use crate::types::{Network, NetworkType};
    use serde_json::json;

    fn operation_message(details: Vec<Value>) -> BeaconMessage {
        let payload = MessagePayload::OperationRequest(OperationRequest {
            network: Network::new(NetworkType::Mainnet),
            operation_details: details,
            source_address: "tz1VQnqCCqX4K5sP3FNkVSNKTdCAMJDd3E1n".into(),
        });
        BeaconMessage::new("7c0e9d0a", "2ZX6b", payload)
    }

    #[test]
    fn round_trip_in_both_formats() {
        let msg = operation_message(vec![json!({"kind": "transaction", "amount": 1_000_000, "fee": -12})]);
        for format in [WireFormat::Checksum, WireFormat::PlainJson] {
            let s = Serializer::new(format);
            let text = s.serialize(&msg).expect("serialize");
            let back = s.deserialize_message(&text).expect("deserialize");
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn checksum_format_is_base58() {
        let s = Serializer::default();
        let text = s.serialize(&json!({"a": 1})).unwrap();
        assert!(text.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!text.contains('0') && !text.contains('O') && !text.contains('l') && !text.contains('I'));
    }

    #[test]
    fn large_integers_are_stringified() {
        let details = json!({"amount": u64::MAX, "counter": -9_007_199_254_740_993i64, "ok": MAX_SAFE_INTEGER});
        let msg = operation_message(vec![details]);
        let s = Serializer::default();
        let text = s.serialize(&msg).unwrap();
        let back = s.deserialize_message(&text).unwrap();
        // Every digit survives, and a second pass changes nothing
        assert_eq!(s.serialize(&back).unwrap(), text);
        match back.payload {
            MessagePayload::OperationRequest(op) => {
                assert_eq!(op.operation_details[0]["amount"], json!("18446744073709551615"));
                assert_eq!(op.operation_details[0]["counter"], json!("-9007199254740993"));
                assert_eq!(op.operation_details[0]["ok"], json!(MAX_SAFE_INTEGER));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn corrupted_checksum_is_a_decoding_error() {
        let s = Serializer::default();
        let text = s.serialize(&operation_message(vec![])).unwrap();
        // Swap the last character for a different valid base58 character
        let mut corrupted = text.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == '2' { '3' } else { '2' });
        let err = s.deserialize_message(&corrupted).expect_err("checksum must fail");
        assert!(matches!(err, SerializerError::Decoding(_)), "{err:?}");

        let truncated = &text[..text.len() - 4];
        let err = s.deserialize_message(truncated).expect_err("truncation must fail");
        assert!(matches!(err, SerializerError::Decoding(_)), "{err:?}");
    }

    #[test]
    fn legacy_messages_are_migrated_on_decode() {
        let s = Serializer::new(WireFormat::PlainJson);
        let legacy = r#"{"id":"1","beaconId":"abc","version":"1","type":"operation_response","transactionHash":"oo"}"#;
        let msg = s.deserialize_message(legacy).unwrap();
        assert_eq!(msg.sender_id, "abc");
        assert_eq!(
            msg.payload,
            MessagePayload::OperationResponse(crate::messages::OperationResponse { operation_hash: "oo".into() })
        );
    }
}
