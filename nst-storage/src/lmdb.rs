//! LMDB-backed local cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable on-device
//! cache. Values are stored as `[timestamp: 8 bytes LE millis][json]` so the
//! tiered cache can apply an optional TTL.
//!
//! # Keys
//!
//! Every stored key starts with a tag byte: `k` followed by the raw key
//! bytes while they fit LMDB's key size limit, or `h` followed by the hex
//! SHA-256 digest of longer keys. The tag keeps the two forms disjoint.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use nst_core::{NstError, NstResult, StorageError};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::traits::{LocalCache, LocalEntry};

/// LMDB's default maximum key size.
pub const MAX_KEY_BYTES: usize = 511;

const TIMESTAMP_BYTES: usize = 8;

const RAW_KEY_TAG: u8 = b'k';
const DIGEST_KEY_TAG: u8 = b'h';

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for NstError {
    fn from(e: LmdbCacheError) -> Self {
        NstError::Storage(StorageError::LocalCache {
            reason: e.to_string(),
        })
    }
}

/// Map a raw cache key to the bytes stored in LMDB.
pub fn encode_key(raw: &str) -> Vec<u8> {
    if raw.len() < MAX_KEY_BYTES {
        let mut key = Vec::with_capacity(raw.len() + 1);
        key.push(RAW_KEY_TAG);
        key.extend_from_slice(raw.as_bytes());
        key
    } else {
        let digest = hex::encode(Sha256::digest(raw.as_bytes()));
        let mut key = Vec::with_capacity(digest.len() + 1);
        key.push(DIGEST_KEY_TAG);
        key.extend_from_slice(digest.as_bytes());
        key
    }
}

fn encode_value(value: &Value, stored_at: DateTime<Utc>) -> NstResult<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut bytes = Vec::with_capacity(TIMESTAMP_BYTES + json.len());
    bytes.extend_from_slice(&stored_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

fn decode_value(bytes: &[u8]) -> Result<LocalEntry, LmdbCacheError> {
    if bytes.len() < TIMESTAMP_BYTES {
        return Err(LmdbCacheError::Corrupt("entry shorter than timestamp".into()));
    }
    let timestamp: [u8; TIMESTAMP_BYTES] = bytes[..TIMESTAMP_BYTES]
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt("invalid timestamp".into()))?;
    let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp))
        .ok_or_else(|| LmdbCacheError::Corrupt("timestamp out of range".into()))?;
    let value = serde_json::from_slice(&bytes[TIMESTAMP_BYTES..])
        .map_err(|e| LmdbCacheError::Corrupt(e.to_string()))?;
    Ok(LocalEntry { value, stored_at })
}

/// Durable local cache in a single unnamed LMDB database.
pub struct LmdbLocalCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl LmdbLocalCache {
    /// Open (or create) the cache at `path` with a map of `map_size_bytes`.
    pub fn open<P: AsRef<Path>>(path: P, map_size_bytes: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_bytes)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), map_size_bytes, "opened LMDB local cache");

        Ok(Self {
            env,
            db,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    /// Open from [`LocalCacheConfig`](nst_core::LocalCacheConfig).
    pub fn from_config(config: &nst_core::LocalCacheConfig) -> Result<Self, LmdbCacheError> {
        Self::open(&config.path, config.map_size_bytes)
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, LmdbCacheError> {
        Ok(self.len()? == 0)
    }

    /// (reads, writes) served since open.
    pub fn op_counts(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }

    /// Write an entry with an explicit timestamp.
    pub fn put_entry(&self, key: &str, entry: &LocalEntry) -> NstResult<()> {
        let bytes = encode_value(&entry.value, entry.stored_at)?;
        let encoded_key = encode_key(key);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, &encoded_key, &bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl LocalCache for LmdbLocalCache {
    fn get(&self, key: &str) -> NstResult<Option<LocalEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let encoded_key = encode_key(key);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, &encoded_key) {
            Ok(Some(bytes)) => Ok(Some(decode_value(bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LmdbCacheError::Transaction(e.to_string()).into()),
        }
    }

    fn set(&self, key: &str, value: &Value) -> NstResult<()> {
        self.put_entry(
            key,
            &LocalEntry {
                value: value.clone(),
                stored_at: Utc::now(),
            },
        )
    }

    fn remove(&self, key: &str) -> NstResult<bool> {
        let encoded_key = encode_key(key);
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let deleted = self
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}
