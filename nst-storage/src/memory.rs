//! In-memory store implementations.
//!
//! Used by tests and offline development. Semantics follow the remote
//! stores closely enough for the tiered cache and the redeem flow to behave
//! the same against either.

use crate::keys::path_segments;
use crate::traits::{DocumentStore, DocumentWrite, ETag, LocalCache, LocalEntry, TreeStore, Versioned};
use async_trait::async_trait;
use chrono::Utc;
use nst_core::{NstResult, StorageError, Tier};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

// ============================================================================
// DOCUMENT STORE
// ============================================================================

/// Document store held in a hash map keyed by `collection/id`.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc_key(collection: &str, id: &str) -> String {
        format!("{}/{}", collection, id)
    }

    /// Number of stored documents across all collections.
    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recursively merge `src` into `dst`; nested objects merge, everything else replaces.
pub(crate) fn deep_merge(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => deep_merge(existing, incoming),
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

fn apply_transforms(doc: &mut Map<String, Value>, write: DocumentWrite) {
    let now = Value::String(Utc::now().to_rfc3339());
    for field in write.server_timestamps {
        doc.insert(field, now.clone());
    }
    for (field, elements) in write.array_unions {
        let slot = doc
            .entry(field)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(items) = slot {
            for element in elements {
                if !items.contains(&element) {
                    items.push(element);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_doc(&self, collection: &str, id: &str) -> NstResult<Option<Value>> {
        let docs = self.docs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(docs
            .get(&Self::doc_key(collection, id))
            .cloned()
            .map(Value::Object))
    }

    async fn set_doc(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
        merge: bool,
    ) -> NstResult<()> {
        let mut docs = self.docs.write().map_err(|_| StorageError::LockPoisoned)?;
        let doc = docs.entry(Self::doc_key(collection, id)).or_default();
        let DocumentWrite {
            fields,
            server_timestamps,
            array_unions,
        } = write;
        if merge {
            deep_merge(doc, fields);
        } else {
            *doc = fields;
        }
        apply_transforms(
            doc,
            DocumentWrite {
                fields: Map::new(),
                server_timestamps,
                array_unions,
            },
        );
        Ok(())
    }

    async fn update_doc(&self, collection: &str, id: &str, write: DocumentWrite) -> NstResult<()> {
        let mut docs = self.docs.write().map_err(|_| StorageError::LockPoisoned)?;
        let doc = docs
            .get_mut(&Self::doc_key(collection, id))
            .ok_or_else(|| StorageError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let DocumentWrite {
            fields,
            server_timestamps,
            array_unions,
        } = write;
        for (key, value) in fields {
            doc.insert(key, value);
        }
        apply_transforms(
            doc,
            DocumentWrite {
                fields: Map::new(),
                server_timestamps,
                array_unions,
            },
        );
        Ok(())
    }
}

// ============================================================================
// TREE STORE
// ============================================================================

/// JSON tree with content-hash ETags and a switchable connection flag.
///
/// While disconnected every call fails with `StorageError::Unavailable`.
pub struct MemoryTreeStore {
    root: RwLock<Value>,
    connected: watch::Sender<bool>,
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTreeStore")
            .field("connected", &*self.connected.borrow())
            .finish_non_exhaustive()
    }
}

/// ETag of a node: SHA-256 over its canonical JSON encoding.
pub fn content_etag(value: Option<&Value>) -> ETag {
    let bytes = serde_json::to_vec(value.unwrap_or(&Value::Null)).unwrap_or_default();
    ETag(hex::encode(Sha256::digest(&bytes)))
}

fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in path_segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Write `value` at `segments` below `node`; `null` deletes and prunes empty parents.
fn write_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        if rest.is_empty() {
            if value.is_null() {
                children.remove(*head);
            } else {
                children.insert((*head).to_string(), value);
            }
            return;
        }
        let child = children
            .entry((*head).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        write_at(child, rest, value);
        let now_empty = match child {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        };
        if now_empty {
            children.remove(*head);
        }
    }
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            connected,
        }
    }

    /// Flip the connection flag and notify watchers.
    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    fn ensure_connected(&self) -> NstResult<()> {
        if *self.connected.borrow() {
            Ok(())
        } else {
            Err(StorageError::Unavailable {
                tier: Tier::Secondary,
                reason: "tree store disconnected".to_string(),
            }
            .into())
        }
    }

    fn write(&self, path: &str, value: Value) -> NstResult<()> {
        let mut root = self.root.write().map_err(|_| StorageError::LockPoisoned)?;
        let segments: Vec<&str> = path_segments(path).collect();
        write_at(&mut root, &segments, value);
        if root.is_null() {
            *root = Value::Object(Map::new());
        }
        Ok(())
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn get(&self, path: &str) -> NstResult<Option<Value>> {
        self.ensure_connected()?;
        let root = self.root.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(node_at(&root, path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> NstResult<()> {
        self.ensure_connected()?;
        self.write(path, value)
    }

    async fn update(&self, path: &str, children: Map<String, Value>) -> NstResult<()> {
        self.ensure_connected()?;
        let mut root = self.root.write().map_err(|_| StorageError::LockPoisoned)?;
        let base: Vec<&str> = path_segments(path).collect();
        for (child, value) in children {
            let mut segments = base.clone();
            segments.extend(path_segments(&child));
            write_at(&mut root, &segments, value);
        }
        Ok(())
    }

    async fn get_versioned(&self, path: &str) -> NstResult<Versioned> {
        self.ensure_connected()?;
        let root = self.root.read().map_err(|_| StorageError::LockPoisoned)?;
        let value = node_at(&root, path).cloned();
        let etag = content_etag(value.as_ref());
        Ok(Versioned { value, etag })
    }

    async fn set_if_match(&self, path: &str, value: Value, expected: &ETag) -> NstResult<bool> {
        self.ensure_connected()?;
        // Compare and write under one lock so no writer can interleave.
        let mut root = self.root.write().map_err(|_| StorageError::LockPoisoned)?;
        if &content_etag(node_at(&root, path)) != expected {
            return Ok(false);
        }
        let segments: Vec<&str> = path_segments(path).collect();
        write_at(&mut root, &segments, value);
        Ok(true)
    }

    fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

// ============================================================================
// LOCAL CACHE
// ============================================================================

/// Non-durable local cache. Stands in for the LMDB cache in tests.
#[derive(Debug, Default)]
pub struct MemoryLocalCache {
    entries: RwLock<HashMap<String, LocalEntry>>,
}

impl MemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry with an explicit write time.
    pub fn insert_entry(&self, key: &str, entry: LocalEntry) -> NstResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalCache for MemoryLocalCache {
    fn get(&self, key: &str) -> NstResult<Option<LocalEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> NstResult<()> {
        self.insert_entry(
            key,
            LocalEntry {
                value: value.clone(),
                stored_at: Utc::now(),
            },
        )
    }

    fn remove(&self, key: &str) -> NstResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }
}
