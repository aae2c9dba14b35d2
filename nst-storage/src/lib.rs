//! NST Storage - Store Traits, Implementations and the Tiered Cache
//!
//! Defines the document, tree and local cache abstractions the client is
//! built on, in-memory and LMDB implementations, key sanitization, and the
//! three-tier content cache.

pub mod deadline;
pub mod keys;
pub mod lmdb;
pub mod memory;
pub mod tiered;
pub mod traits;

pub use deadline::with_deadline;
pub use keys::{code_path, content_doc_id, content_tree_path, join_path, sanitize_key};
pub use lmdb::{LmdbCacheError, LmdbLocalCache};
pub use memory::{content_etag, MemoryDocumentStore, MemoryLocalCache, MemoryTreeStore};
pub use tiered::{TierHit, TierStats, TieredCache, TieredCacheConfig, TieredCacheStats, WriteReport};
pub use traits::{
    DocumentStore, DocumentWrite, ETag, LocalCache, LocalEntry, TreeStore, Versioned,
};
