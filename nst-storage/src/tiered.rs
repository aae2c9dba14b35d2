//! Tiered content cache.
//!
//! Reads fall through local → primary (documents) → secondary (tree), writing
//! remote hits back to the local cache. Writes go to the primary store, then
//! independently to the secondary store, with a local-only write when the
//! secondary store fails. Remote failures are logged and treated as "tier
//! unavailable"; nothing here returns an error to the caller.
//!
//! The local tier is authoritative while an entry exists unless a TTL is
//! configured, in which case older entries count as misses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use nst_core::{LessonContent, LocalCacheConfig, RemoteConfig, Tier, CONTENT_COLLECTION};
use serde_json::Value;

use crate::deadline::with_deadline;
use crate::keys::{content_doc_id, content_tree_path};
use crate::traits::{DocumentStore, DocumentWrite, LocalCache, TreeStore};

// ============================================================================
// CONFIG AND RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TieredCacheConfig {
    /// Deadline for each remote call.
    pub call_timeout: Duration,
    /// Local entries older than this are ignored. `None` never expires.
    pub local_ttl: Option<Duration>,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            local_ttl: None,
        }
    }
}

impl TieredCacheConfig {
    pub fn from_config(remote: &RemoteConfig, local: &LocalCacheConfig) -> Self {
        Self {
            call_timeout: remote.call_timeout,
            local_ttl: local.ttl,
        }
    }
}

/// A cache hit and the tier that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct TierHit {
    pub value: Value,
    pub tier: Tier,
}

/// Which tiers accepted a [`TieredCache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReport {
    pub primary: bool,
    pub secondary: bool,
    /// Only attempted when the secondary write failed.
    pub local: bool,
}

impl WriteReport {
    pub fn any(&self) -> bool {
        self.primary || self.secondary || self.local
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that failed or timed out.
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TieredCacheStats {
    pub local: TierStats,
    pub primary: TierStats,
    pub secondary: TierStats,
}

// ============================================================================
// TIERED CACHE
// ============================================================================

pub struct TieredCache {
    primary: Arc<dyn DocumentStore>,
    secondary: Arc<dyn TreeStore>,
    local: Arc<dyn LocalCache>,
    config: TieredCacheConfig,
    local_counters: TierCounters,
    primary_counters: TierCounters,
    secondary_counters: TierCounters,
}

impl TieredCache {
    pub fn new(
        primary: Arc<dyn DocumentStore>,
        secondary: Arc<dyn TreeStore>,
        local: Arc<dyn LocalCache>,
        config: TieredCacheConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            local,
            config,
            local_counters: TierCounters::default(),
            primary_counters: TierCounters::default(),
            secondary_counters: TierCounters::default(),
        }
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    fn counters(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Local => &self.local_counters,
            Tier::Primary => &self.primary_counters,
            Tier::Secondary => &self.secondary_counters,
        }
    }

    fn record(&self, tier: Tier, hit: bool) {
        let counters = self.counters(tier);
        if hit {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_error(&self, tier: Tier) {
        self.counters(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TieredCacheStats {
        TieredCacheStats {
            local: self.local_counters.snapshot(),
            primary: self.primary_counters.snapshot(),
            secondary: self.secondary_counters.snapshot(),
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Look `key` up across the tiers. `None` when no tier has it.
    pub async fn get(&self, key: &str) -> Option<TierHit> {
        if let Some(value) = self.get_local(key) {
            return Some(TierHit {
                value,
                tier: Tier::Local,
            });
        }

        let doc_id = content_doc_id(key);
        match with_deadline(
            self.config.call_timeout,
            "get_doc",
            self.primary.get_doc(CONTENT_COLLECTION, &doc_id),
        )
        .await
        {
            Ok(Some(value)) => {
                self.record(Tier::Primary, true);
                tracing::debug!(key, tier = %Tier::Primary, "cache hit");
                self.write_local(key, &value);
                return Some(TierHit {
                    value,
                    tier: Tier::Primary,
                });
            }
            Ok(None) => self.record(Tier::Primary, false),
            Err(e) => {
                self.record_error(Tier::Primary);
                tracing::warn!(key, tier = %Tier::Primary, error = %e, "tier unavailable");
            }
        }

        let path = content_tree_path(key);
        match with_deadline(self.config.call_timeout, "get", self.secondary.get(&path)).await {
            Ok(Some(value)) => {
                self.record(Tier::Secondary, true);
                tracing::debug!(key, tier = %Tier::Secondary, "cache hit");
                self.write_local(key, &value);
                Some(TierHit {
                    value,
                    tier: Tier::Secondary,
                })
            }
            Ok(None) => {
                self.record(Tier::Secondary, false);
                tracing::trace!(key, "miss on every tier");
                None
            }
            Err(e) => {
                self.record_error(Tier::Secondary);
                tracing::warn!(key, tier = %Tier::Secondary, error = %e, "tier unavailable");
                None
            }
        }
    }

    fn get_local(&self, key: &str) -> Option<Value> {
        match self.local.get(key) {
            Ok(Some(entry)) => {
                if let Some(ttl) = self.config.local_ttl {
                    let age = entry.age(Utc::now());
                    if age > ttl {
                        self.record(Tier::Local, false);
                        tracing::debug!(key, age_ms = age.as_millis() as u64, "local entry expired");
                        return None;
                    }
                }
                self.record(Tier::Local, true);
                tracing::debug!(key, tier = %Tier::Local, "cache hit");
                Some(entry.value)
            }
            Ok(None) => {
                self.record(Tier::Local, false);
                None
            }
            Err(e) => {
                self.record_error(Tier::Local);
                tracing::warn!(key, tier = %Tier::Local, error = %e, "local cache read failed");
                None
            }
        }
    }

    fn write_local(&self, key: &str, value: &Value) -> bool {
        match self.local.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "local write-back failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Persist `value` under `key`. Best effort; see [`WriteReport`].
    pub async fn set(&self, key: &str, value: &Value) -> WriteReport {
        let mut report = WriteReport::default();

        let write = decorate(key, value);
        match with_deadline(
            self.config.call_timeout,
            "set_doc",
            self.primary
                .set_doc(CONTENT_COLLECTION, &content_doc_id(key), write, true),
        )
        .await
        {
            Ok(()) => report.primary = true,
            Err(e) => {
                tracing::warn!(key, tier = %Tier::Primary, error = %e, "write-back failed");
            }
        }

        let path = content_tree_path(key);
        match with_deadline(
            self.config.call_timeout,
            "set",
            self.secondary.set(&path, value.clone()),
        )
        .await
        {
            Ok(()) => report.secondary = true,
            Err(e) => {
                tracing::warn!(key, tier = %Tier::Secondary, error = %e, "write-back failed, keeping local copy");
                report.local = self.write_local(key, value);
            }
        }

        report
    }

    /// Write many entries to the secondary store concurrently.
    ///
    /// Returns how many writes succeeded; failures are logged.
    pub async fn bulk_set(&self, entries: Vec<(String, Value)>) -> usize {
        let total = entries.len();
        let writes = entries.into_iter().map(|(key, value)| async move {
            let path = content_tree_path(&key);
            let result = with_deadline(
                self.config.call_timeout,
                "set",
                self.secondary.set(&path, value),
            )
            .await;
            if let Err(e) = &result {
                tracing::warn!(key = %key, tier = %Tier::Secondary, error = %e, "bulk write failed");
            }
            result.is_ok()
        });
        let written = join_all(writes).await.into_iter().filter(|ok| *ok).count();
        tracing::info!(written, total, "bulk content write finished");
        written
    }

    /// Drop the local copy of `key`. Returns true when one existed.
    pub fn invalidate_local(&self, key: &str) -> bool {
        match self.local.remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key, error = %e, "local invalidation failed");
                false
            }
        }
    }
}

/// Primary-store document for a content entry.
///
/// Adds `premium`, `title` (payload title or the key) and a server-side
/// `updatedAt`.
pub fn decorate(key: &str, value: &Value) -> DocumentWrite {
    let content = LessonContent::new(value.clone());
    let premium = content.is_premium();
    let title = content.title().unwrap_or(key).to_string();
    DocumentWrite::from_value(value.clone())
        .set("premium", premium)
        .set("title", title)
        .server_timestamp("updatedAt")
}
