//! Integration tests for content resolution through the tiered cache.
//!
//! Covers write-then-read across tiers, degraded remote stores, key
//! sanitization and the single generation guarantee under concurrency.

use std::sync::Arc;
use std::time::Duration;

use nst_client::{ContentResolver, ResolutionSource};
use nst_core::{ResolverConfig, Tier};
use nst_storage::{TieredCache, TieredCacheConfig, TreeStore};
use nst_test_utils::generators::{arb_content_request, arb_raw_key};
use nst_test_utils::{sample_request, FlakyDocumentStore, MemoryStores, MockContentGenerator};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// HELPERS
// ============================================================================

fn fast_config() -> TieredCacheConfig {
    TieredCacheConfig {
        call_timeout: Duration::from_millis(200),
        ..TieredCacheConfig::default()
    }
}

fn cache(stores: &MemoryStores) -> Arc<TieredCache> {
    Arc::new(TieredCache::new(
        stores.documents.clone(),
        stores.tree.clone(),
        stores.local.clone(),
        fast_config(),
    ))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// TIERED CACHE
// ============================================================================

#[tokio::test]
async fn test_set_then_get_from_every_tier() {
    let stores = MemoryStores::new();
    let cache = cache(&stores);
    let value = json!({"title": "Acids, Bases and Salts", "content": "pH scale"});

    let report = cache.set("nst_content_CBSE_10_Science_ch-2_Notes", &value).await;
    assert!(report.primary && report.secondary);

    let hit = cache.get("nst_content_CBSE_10_Science_ch-2_Notes").await.unwrap();
    assert_eq!(hit.tier, Tier::Primary);
    assert_eq!(hit.value["content"], json!("pH scale"));

    // The primary hit was copied to the local tier.
    let hit = cache.get("nst_content_CBSE_10_Science_ch-2_Notes").await.unwrap();
    assert_eq!(hit.tier, Tier::Local);
}

#[tokio::test]
async fn test_secondary_serves_when_primary_is_down() {
    let stores = MemoryStores::new();
    let documents = Arc::new(FlakyDocumentStore::new(stores.documents.clone()));
    let cache = TieredCache::new(
        documents.clone(),
        stores.tree.clone(),
        stores.local.clone(),
        fast_config(),
    );
    stores
        .tree
        .set("nst_content/some_key", json!({"content": "from tree"}))
        .await
        .unwrap();

    documents.fail_all(true);
    let hit = cache.get("some_key").await.unwrap();
    assert_eq!(hit.tier, Tier::Secondary);
    assert_eq!(cache.stats().primary.errors, 1);
}

#[tokio::test]
async fn test_slow_primary_times_out_and_falls_through() {
    let stores = MemoryStores::new();
    let documents = Arc::new(FlakyDocumentStore::new(stores.documents.clone()));
    documents.set_latency(Some(Duration::from_secs(2)));
    let cache = TieredCache::new(
        documents.clone(),
        stores.tree.clone(),
        stores.local.clone(),
        TieredCacheConfig {
            call_timeout: Duration::from_millis(30),
            ..TieredCacheConfig::default()
        },
    );

    assert!(cache.get("absent").await.is_none());
    assert_eq!(cache.stats().primary.errors, 1);
}

#[tokio::test]
async fn test_offline_write_keeps_local_copy() {
    let stores = MemoryStores::new();
    let cache = cache(&stores);
    stores.tree.set_connected(false);

    let report = cache.set("offline_key", &json!({"content": "x"})).await;
    assert!(!report.secondary);
    assert!(report.local);
    assert_eq!(cache.get("offline_key").await.unwrap().tier, Tier::Local);
}

// ============================================================================
// RESOLVER
// ============================================================================

#[tokio::test]
async fn test_concurrent_resolves_call_provider_once() {
    let stores = MemoryStores::new();
    let generator = Arc::new(MockContentGenerator::new().with_delay(Duration::from_millis(40)));
    let resolver = Arc::new(ContentResolver::new(
        cache(&stores),
        generator.clone(),
        ResolverConfig { single_flight: true },
    ));
    let request = sample_request();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            let request = request.clone();
            tokio::spawn(async move { resolver.resolve(&request).await })
        })
        .collect();

    let mut generated = 0;
    for task in tasks {
        let resolution = task.await.unwrap().unwrap();
        if resolution.source == ResolutionSource::Generated {
            generated += 1;
        }
        assert_eq!(resolution.content.title(), Some(request.chapter.title.as_str()));
    }
    assert_eq!(generated, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_failed_generation_is_not_cached() {
    let stores = MemoryStores::new();
    let generator = Arc::new(MockContentGenerator::new());
    generator.fail_next("model overloaded");
    let resolver = ContentResolver::new(cache(&stores), generator.clone(), ResolverConfig::default());

    assert!(resolver.resolve(&sample_request()).await.is_err());
    assert!(stores.documents.is_empty());

    let retry = resolver.resolve(&sample_request()).await.unwrap();
    assert_eq!(retry.source, ResolutionSource::Generated);
    assert_eq!(generator.calls(), 2);
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Keys with characters the tree store forbids still read back what was written.
    #[test]
    fn prop_raw_keys_survive_sanitization(key in arb_raw_key(), n in any::<u32>()) {
        let stores = MemoryStores::new();
        let cache = cache(&stores);
        let value = json!({"content": format!("body {}", n)});

        let hit = runtime().block_on(async {
            cache.set(&key, &value).await;
            cache.invalidate_local(&key);
            cache.get(&key).await
        });
        let hit = hit.expect("written key must be readable");
        prop_assert_eq!(&hit.value["content"], &value["content"]);
    }

    /// Any valid request is generated once and then served from cache.
    #[test]
    fn prop_second_resolve_never_regenerates(request in arb_content_request()) {
        let stores = MemoryStores::new();
        let generator = Arc::new(MockContentGenerator::new());
        let resolver = ContentResolver::new(cache(&stores), generator.clone(), ResolverConfig::default());

        let second = runtime().block_on(async {
            resolver.resolve(&request).await.unwrap();
            resolver.resolve(&request).await.unwrap()
        });
        prop_assert!(matches!(second.source, ResolutionSource::Cache(_)));
        prop_assert_eq!(generator.calls(), 1);
    }
}
