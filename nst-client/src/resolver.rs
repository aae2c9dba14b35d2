//! Content resolution: tiered cache first, generation on a miss.
//!
//! A request is keyed by its [`ContentKey`](nst_core::ContentKey). Cached
//! content is returned without calling the generator. On a miss the
//! generator runs once, the result is written back through the cache, and
//! generation errors reach the caller unchanged.
//!
//! With single-flight enabled, concurrent resolutions of one key queue on a
//! per-key lock and re-check the cache once they hold it, so only the first
//! caller generates.

use std::sync::Arc;

use dashmap::DashMap;
use nst_core::{
    Chapter, ChapterQuery, ContentRequest, GenerationError, LessonContent, NstError, NstResult,
    ResolverConfig, Tier,
};
use nst_llm::ContentGenerator;
use nst_storage::{TieredCache, TieredCacheStats};
use tokio::sync::{Mutex, MutexGuard};

/// Where resolved content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache(Tier),
    Generated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub content: LessonContent,
    pub source: ResolutionSource,
}

pub struct ContentResolver {
    cache: Arc<TieredCache>,
    generator: Arc<dyn ContentGenerator>,
    config: ResolverConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ContentResolver {
    pub fn new(
        cache: Arc<TieredCache>,
        generator: Arc<dyn ContentGenerator>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            generator,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn cache_stats(&self) -> TieredCacheStats {
        self.cache.stats()
    }

    /// Resolve `request` to its lesson content.
    pub async fn resolve(&self, request: &ContentRequest) -> NstResult<Resolution> {
        let key = request.key();
        if let Some(hit) = self.lookup(key.as_str()).await {
            return Ok(hit);
        }
        if !self.config.single_flight {
            return self.generate_and_store(request, key.as_str()).await;
        }

        let flight = InFlight::join(&self.in_flight, key.as_str());
        let _turn = flight.wait().await;
        match self.lookup(key.as_str()).await {
            Some(hit) => Ok(hit),
            None => self.generate_and_store(request, key.as_str()).await,
        }
    }

    /// Resolve and return only the content.
    pub async fn resolve_content(&self, request: &ContentRequest) -> NstResult<LessonContent> {
        self.resolve(request).await.map(|r| r.content)
    }

    /// Chapters of a subject, straight from the generator.
    pub async fn list_chapters(&self, query: &ChapterQuery) -> NstResult<Vec<Chapter>> {
        self.generator
            .list_chapters(query)
            .await
            .map_err(|e| self.generation_failure(e))
    }

    async fn lookup(&self, key: &str) -> Option<Resolution> {
        self.cache.get(key).await.map(|hit| Resolution {
            content: LessonContent::new(hit.value),
            source: ResolutionSource::Cache(hit.tier),
        })
    }

    async fn generate_and_store(&self, request: &ContentRequest, key: &str) -> NstResult<Resolution> {
        tracing::debug!(
            key,
            provider = self.generator.provider_name(),
            "cache miss, generating content"
        );
        let content = self
            .generator
            .generate(request)
            .await
            .map_err(|e| self.generation_failure(e))?;

        let report = self.cache.set(key, content.as_value()).await;
        if !report.any() {
            tracing::warn!(key, "generated content was not persisted to any tier");
        }
        Ok(Resolution {
            content,
            source: ResolutionSource::Generated,
        })
    }

    fn generation_failure(&self, e: NstError) -> NstError {
        tracing::error!(provider = self.generator.provider_name(), error = %e, "content generation failed");
        match e {
            NstError::Generation(_) => e,
            other => GenerationError::GenerationFailed {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

/// One caller's place in the per-key queue.
///
/// Dropping it, including when the caller's future is cancelled while
/// waiting, removes the key's entry once no other caller holds it.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Option<Arc<Mutex<()>>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let lock = Arc::clone(map.entry(key.to_string()).or_default().value());
        Self {
            map,
            key,
            lock: Some(lock),
        }
    }

    async fn wait(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        // The map's clone is the only one left once no caller is queued on the key.
        self.map
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for ContentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentResolver")
            .field("provider", &self.generator.provider_name())
            .field("single_flight", &self.config.single_flight)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
