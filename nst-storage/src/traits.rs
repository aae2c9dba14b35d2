//! Store abstractions.
//!
//! Three collaborators back the tiered cache and the redeem flow:
//!
//! - [`DocumentStore`]: collections of JSON documents with merge writes,
//!   array-union and server timestamps.
//! - [`TreeStore`]: a JSON tree addressed by slash paths, with ETag
//!   conditional writes and a live connection signal.
//! - [`LocalCache`]: a synchronous, durable key-value cache on the device.
//!
//! Remote implementations report outages as
//! [`StorageError::Unavailable`](nst_core::StorageError::Unavailable).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nst_core::NstResult;
use serde_json::{Map, Value};
use tokio::sync::watch;

// ============================================================================
// DOCUMENT STORE
// ============================================================================

/// A single document mutation.
///
/// Plain fields, server-side timestamps and array unions are applied in one
/// write, so a store can commit them atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    pub fields: Map<String, Value>,
    /// Fields set to the server's commit time.
    pub server_timestamps: Vec<String>,
    /// Fields extended with elements not already present.
    pub array_unions: Vec<(String, Vec<Value>)>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the fields of a JSON object. Non-objects are stored under `value`.
    pub fn from_value(value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }

    pub fn array_union(mut self, field: impl Into<String>, elements: Vec<Value>) -> Self {
        self.array_unions.push((field.into(), elements));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.server_timestamps.is_empty() && self.array_unions.is_empty()
    }
}

/// Document-oriented remote store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `Ok(None)` when it does not exist.
    async fn get_doc(&self, collection: &str, id: &str) -> NstResult<Option<Value>>;

    /// Write a document. With `merge`, fields not named in `write` survive;
    /// without it, the document is replaced.
    async fn set_doc(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
        merge: bool,
    ) -> NstResult<()>;

    /// Apply `write` to an existing document.
    ///
    /// Fails with `StorageError::DocumentNotFound` when the document is absent.
    async fn update_doc(&self, collection: &str, id: &str, write: DocumentWrite) -> NstResult<()>;
}

// ============================================================================
// TREE STORE
// ============================================================================

/// Opaque version tag of a tree node, as returned by [`TreeStore::get_versioned`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(pub String);

impl ETag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A node value together with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Option<Value>,
    pub etag: ETag,
}

/// Tree-structured remote store.
///
/// Writing `null` to a path deletes the node.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn get(&self, path: &str) -> NstResult<Option<Value>>;

    /// Replace the node at `path`.
    async fn set(&self, path: &str, value: Value) -> NstResult<()>;

    /// Replace each named child of `path`, leaving other children untouched.
    async fn update(&self, path: &str, children: Map<String, Value>) -> NstResult<()>;

    /// Read a node and its current version.
    async fn get_versioned(&self, path: &str) -> NstResult<Versioned>;

    /// Replace the node only if it is still at `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    async fn set_if_match(&self, path: &str, value: Value, expected: &ETag) -> NstResult<bool>;

    /// Live connection signal. `true` while the store is reachable.
    fn watch_connected(&self) -> watch::Receiver<bool>;
}

// ============================================================================
// LOCAL CACHE
// ============================================================================

/// A locally cached value and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

impl LocalEntry {
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.stored_at).to_std().unwrap_or_default()
    }
}

/// Synchronous durable cache on the device. Keys are raw, unsanitized strings.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> NstResult<Option<LocalEntry>>;

    fn set(&self, key: &str, value: &Value) -> NstResult<()>;

    /// Returns true when an entry was removed.
    fn remove(&self, key: &str) -> NstResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_write_builder() {
        let write = DocumentWrite::from_value(json!({"title": "Metals"}))
            .set("premium", false)
            .server_timestamp("updatedAt")
            .array_union("tags", vec![json!("chem")]);
        assert_eq!(write.fields["title"], json!("Metals"));
        assert_eq!(write.fields["premium"], json!(false));
        assert_eq!(write.server_timestamps, vec!["updatedAt".to_string()]);
        assert_eq!(write.array_unions.len(), 1);
        assert!(!write.is_empty());
    }

    #[test]
    fn test_document_write_wraps_scalars() {
        let write = DocumentWrite::from_value(json!("plain text"));
        assert_eq!(write.fields["value"], json!("plain text"));
    }

    #[test]
    fn test_local_entry_age_never_negative() {
        let entry = LocalEntry {
            value: json!(1),
            stored_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert_eq!(entry.age(Utc::now()), std::time::Duration::ZERO);
    }
}
