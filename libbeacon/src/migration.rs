//! Legacy field-name rewriting.
//!
//! Older peers and older persisted records use field names that have since been renamed. These are rewritten exactly
//! once, at the point where raw JSON enters the system (message deserialization and the stored-records migration), so
//! nothing downstream needs to know about the old names.

use log::*;
use serde_json::{Map, Value};

/// `(legacy, current)` field renames that apply to every message and stored record.
const FIELD_RENAMES: [(&str, &str); 3] = [("beaconId", "senderId"), ("pubkey", "publicKey"), ("pubKey", "publicKey")];

fn rename_field(obj: &mut Map<String, Value>, from: &str, to: &str) -> bool {
    if obj.contains_key(to) {
        return obj.remove(from).is_some();
    }
    match obj.remove(from) {
        Some(v) => {
            obj.insert(to.to_string(), v);
            true
        }
        None => false,
    }
}

/// Rewrites legacy field names in an inbound message. Returns `true` if anything was changed.
///
/// Besides the generic renames, an `operation_response` that still reports `transactionHash` has it moved to
/// `operationHash`.
pub fn migrate_message(value: &mut Value) -> bool {
    let Some(obj) = value.as_object_mut() else {
        return false;
    };
    let mut changed = false;
    for (from, to) in FIELD_RENAMES {
        changed |= rename_field(obj, from, to);
    }
    if obj.get("type").and_then(Value::as_str) == Some("operation_response") {
        changed |= rename_field(obj, "transactionHash", "operationHash");
    }
    if changed {
        debug!("Rewrote legacy field names on inbound message");
    }
    changed
}

/// Rewrites legacy field names on a stored record (account or peer). Returns `true` if anything was changed.
///
/// Very old records stored `connectedAt` as a date string; it is converted to epoch milliseconds.
pub fn migrate_record(value: &mut Value) -> bool {
    let Some(obj) = value.as_object_mut() else {
        return false;
    };
    let mut changed = false;
    for (from, to) in FIELD_RENAMES {
        changed |= rename_field(obj, from, to);
    }
    if let Some(Value::String(date)) = obj.get("connectedAt") {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
            obj.insert("connectedAt".into(), Value::from(dt.timestamp_millis()));
            changed = true;
        }
    }
    changed
}
