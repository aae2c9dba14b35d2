//! Injected store handles and connection state.

use std::future::Future;
use std::sync::Arc;

use nst_core::{HealthCheck, HealthReport, NstConfig, NstResult, CURRENT_USER_KEY};
use nst_firebase::{FirestoreRestStore, RtdbRestStore};
use nst_storage::{
    with_deadline, DocumentStore, LmdbLocalCache, LocalCache, TieredCache, TieredCacheConfig,
    TreeStore,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Everything the client flows need, passed explicitly instead of living in globals.
///
/// Cloning is cheap; all handles are shared.
#[derive(Clone)]
pub struct StoreContext {
    documents: Arc<dyn DocumentStore>,
    tree: Arc<dyn TreeStore>,
    local: Arc<dyn LocalCache>,
    config: Arc<NstConfig>,
    connected: watch::Receiver<bool>,
}

impl StoreContext {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        tree: Arc<dyn TreeStore>,
        local: Arc<dyn LocalCache>,
        config: NstConfig,
    ) -> Self {
        let connected = tree.watch_connected();
        Self {
            documents,
            tree,
            local,
            config: Arc::new(config),
            connected,
        }
    }

    /// Build the Firebase REST stores and the LMDB cache from `config`, and
    /// start the realtime database connectivity probe.
    pub fn connect(
        config: NstConfig,
        shutdown: watch::Receiver<bool>,
    ) -> NstResult<(Self, JoinHandle<()>)> {
        config.validate()?;
        config.require_remote()?;

        let documents = Arc::new(FirestoreRestStore::from_config(&config.remote)?);
        let tree = Arc::new(RtdbRestStore::from_config(&config.remote)?);
        let local = Arc::new(LmdbLocalCache::from_config(&config.local_cache)?);
        let probe = tree.spawn_connectivity_probe(config.remote.connectivity_probe_interval, shutdown);

        tracing::info!(
            cache_path = %config.local_cache.path.display(),
            call_timeout_ms = config.remote.call_timeout.as_millis() as u64,
            "store context connected"
        );
        Ok((Self::new(documents, tree, local, config), probe))
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn tree(&self) -> &Arc<dyn TreeStore> {
        &self.tree
    }

    pub fn local(&self) -> &Arc<dyn LocalCache> {
        &self.local
    }

    pub fn config(&self) -> &NstConfig {
        &self.config
    }

    /// A tiered content cache over this context's stores.
    pub fn tiered_cache(&self) -> TieredCache {
        TieredCache::new(
            Arc::clone(&self.documents),
            Arc::clone(&self.tree),
            Arc::clone(&self.local),
            TieredCacheConfig::from_config(&self.config.remote, &self.config.local_cache),
        )
    }

    /// Run a remote call under the configured per-call deadline.
    pub async fn remote<T, F>(&self, operation: &str, call: F) -> NstResult<T>
    where
        F: Future<Output = NstResult<T>>,
    {
        with_deadline(self.config.remote.call_timeout, operation, call).await
    }

    /// Last known reachability of the realtime database.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Write `value` to the local mirror under `key`; failures are logged.
    pub(crate) fn mirror_local(&self, key: &str, value: &Value) {
        if let Err(e) = self.local.set(key, value) {
            tracing::warn!(key, error = %e, "local mirror write failed");
        }
    }

    /// Remote connectivity as a health check.
    pub fn health(&self) -> HealthCheck {
        if self.is_connected() {
            HealthCheck::healthy("remote")
        } else {
            HealthCheck::degraded("remote", "realtime database unreachable, serving from local cache")
        }
    }

    /// Remote connectivity plus a read of the local cache.
    pub fn health_report(&self) -> HealthReport {
        let local = match self.local.get(CURRENT_USER_KEY) {
            Ok(entry) => HealthCheck::healthy("local_cache")
                .with_metadata("signed_in", Value::Bool(entry.is_some())),
            Err(e) => HealthCheck::unhealthy("local_cache", e.to_string()),
        };
        HealthReport::from_checks(vec![self.health(), local])
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nst_core::HealthStatus;
    use nst_storage::{MemoryDocumentStore, MemoryLocalCache, MemoryTreeStore};

    fn context() -> (StoreContext, Arc<MemoryTreeStore>) {
        let tree = Arc::new(MemoryTreeStore::new());
        let mut config = NstConfig::default();
        config.remote.call_timeout = std::time::Duration::from_millis(20);
        let ctx = StoreContext::new(
            Arc::new(MemoryDocumentStore::new()),
            tree.clone(),
            Arc::new(MemoryLocalCache::new()),
            config,
        );
        (ctx, tree)
    }

    #[test]
    fn test_connection_follows_tree_store() {
        let (ctx, tree) = context();
        assert!(ctx.is_connected());
        assert_eq!(ctx.health().status, HealthStatus::Healthy);

        tree.set_connected(false);
        assert!(!ctx.is_connected());
        assert_eq!(ctx.health().status, HealthStatus::Degraded);
        assert!(ctx.health_report().is_serving());
    }

    #[test]
    fn test_connect_requires_remote_settings() {
        let (_tx, rx) = watch::channel(false);
        let err = StoreContext::connect(NstConfig::default(), rx).unwrap_err();
        assert!(err.to_string().contains("NST_RTDB_URL"));
    }

    #[tokio::test]
    async fn test_remote_applies_deadline() {
        let (ctx, _) = context();
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(())
        };
        let err = ctx.remote("get", slow).await.unwrap_err();
        assert!(err.is_tier_unavailable());
    }
}
