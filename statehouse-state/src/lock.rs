//! Lock descriptors for advisory state locking

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::{BackendError, BackendResult};

/// Wire names of the descriptor fields
const WIRE_FIELDS: [&str; 7] = ["ID", "Operation", "Info", "Who", "Version", "Created", "Path"];

/// Information about a state lock
///
/// Field names follow the wire form sent by the IaC client (`ID`, `Operation`,
/// ...). Only `id` is interpreted by the store; everything else is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LockInfo {
    /// Unique identifier for this lock, chosen by the caller
    #[serde(rename = "ID")]
    pub id: String,
    /// The operation being performed (e.g., "OperationTypeApply")
    pub operation: String,
    /// Extra information provided by the caller
    pub info: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// Client version string
    pub version: String,
    /// When the lock was created, with the offset the client sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<FixedOffset>>,
    /// Path of the locked state, filled in by the store when empty
    pub path: String,
}

impl LockInfo {
    /// Create a new lock for an operation with a random ID
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            info: String::new(),
            who: get_lock_owner(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Some(Utc::now().into()),
            path: String::new(),
        }
    }

    /// Create a lock descriptor carrying only an ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Decode a descriptor from its JSON wire form
    ///
    /// Keys are matched case-insensitively, so `"id"` and `"ID"` name the
    /// same field. An exact match wins over a case-folded one.
    pub fn decode(bytes: &[u8]) -> BackendResult<Self> {
        Self::parse(bytes)
            .map_err(|e| BackendError::MalformedInput(format!("Invalid lock descriptor: {}", e)))
    }

    pub(crate) fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        let value = match serde_json::from_slice(bytes)? {
            Value::Object(map) => Value::Object(canonicalize_keys(map)),
            other => other,
        };
        serde_json::from_value(value)
    }

    /// Encode the descriptor as pretty-printed JSON
    pub fn encode(&self) -> BackendResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BackendError::Serialization(format!("Failed to encode lock: {}", e)))
    }

    /// Whether this descriptor names the same holder as `other`
    pub fn same_holder(&self, other: &LockInfo) -> bool {
        self.id == other.id
    }
}

/// Rename descriptor keys to their wire spelling, dropping unknown keys
fn canonicalize_keys(map: Map<String, Value>) -> Map<String, Value> {
    let (exact, folded): (Vec<_>, Vec<_>) = map
        .into_iter()
        .partition(|(key, _)| WIRE_FIELDS.contains(&key.as_str()));

    let mut canonical = Map::new();
    for (key, value) in folded {
        if let Some(field) = WIRE_FIELDS.iter().find(|f| f.eq_ignore_ascii_case(&key)) {
            canonical.insert(field.to_string(), value);
        }
    }
    for (key, value) in exact {
        canonical.insert(key, value);
    }
    canonical
}

/// Get the lock owner string (username@hostname)
fn get_lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_new() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(!lock.who.is_empty());
        assert!(lock.created.is_some());
        assert!(lock.path.is_empty());
    }

    #[test]
    fn test_lock_ids_are_unique() {
        assert_ne!(LockInfo::new("apply").id, LockInfo::new("apply").id);
    }

    #[test]
    fn test_lock_owner_format() {
        let who = get_lock_owner();
        assert!(who.contains('@'));
    }

    #[test]
    fn test_decode_client_descriptor() {
        let body = br#"{
            "ID": "5b1f2c3e-0000-4d6f-9a4b-0123456789ab",
            "Operation": "OperationTypeApply",
            "Info": "",
            "Who": "alice@workstation",
            "Version": "1.7.5",
            "Created": "2024-03-01T10:15:30.123456789Z",
            "Path": ""
        }"#;

        let lock = LockInfo::decode(body).unwrap();
        assert_eq!(lock.id, "5b1f2c3e-0000-4d6f-9a4b-0123456789ab");
        assert_eq!(lock.operation, "OperationTypeApply");
        assert_eq!(lock.who, "alice@workstation");
        assert_eq!(lock.version, "1.7.5");
        assert!(lock.created.is_some());
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let lock = LockInfo::decode(br#"{"ID": "a"}"#).unwrap();
        assert_eq!(lock, LockInfo::with_id("a"));
    }

    #[test]
    fn test_decode_matches_keys_case_insensitively() {
        let lock = LockInfo::decode(br#"{"id": "a", "operation": "plan", "WHO": "bob@host"}"#)
            .unwrap();
        assert_eq!(lock.id, "a");
        assert_eq!(lock.operation, "plan");
        assert_eq!(lock.who, "bob@host");

        let lock = LockInfo::decode(br#"{"Id": "b"}"#).unwrap();
        assert_eq!(lock.id, "b");
    }

    #[test]
    fn test_decode_prefers_exact_key() {
        let lock = LockInfo::decode(br#"{"id": "folded", "ID": "exact"}"#).unwrap();
        assert_eq!(lock.id, "exact");

        let lock = LockInfo::decode(br#"{"ID": "exact", "id": "folded"}"#).unwrap();
        assert_eq!(lock.id, "exact");
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let lock = LockInfo::decode(br#"{"ID": "a", "Expires": "never"}"#).unwrap();
        assert_eq!(lock, LockInfo::with_id("a"));
    }

    #[test]
    fn test_created_keeps_client_offset() {
        let lock =
            LockInfo::decode(br#"{"ID": "a", "Created": "2024-03-01T10:15:30+02:00"}"#).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&lock.encode().unwrap()).unwrap();

        assert_eq!(json["Created"], serde_json::json!("2024-03-01T10:15:30+02:00"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = LockInfo::decode(b"not json");
        assert!(matches!(result, Err(BackendError::MalformedInput(_))));

        let result = LockInfo::decode(br#"{"ID": 42}"#);
        assert!(matches!(result, Err(BackendError::MalformedInput(_))));

        let result = LockInfo::decode(br#"{"id": 42}"#);
        assert!(matches!(result, Err(BackendError::MalformedInput(_))));

        let result = LockInfo::decode(b"42");
        assert!(matches!(result, Err(BackendError::MalformedInput(_))));
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let lock = LockInfo::new("apply");
        let json: serde_json::Value = serde_json::from_slice(&lock.encode().unwrap()).unwrap();

        assert_eq!(json["ID"], serde_json::json!(lock.id));
        assert_eq!(json["Operation"], serde_json::json!("apply"));
        assert!(json.get("Created").is_some());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_same_holder_compares_id_only() {
        let mut a = LockInfo::with_id("a");
        a.operation = "apply".to_string();
        let mut also_a = LockInfo::with_id("a");
        also_a.operation = "plan".to_string();

        assert!(a.same_holder(&also_a));
        assert!(!a.same_holder(&LockInfo::with_id("b")));
    }
}
