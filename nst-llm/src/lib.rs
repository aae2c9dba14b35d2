//! NST LLM - Content Generation Providers
//!
//! Defines the [`ContentGenerator`] contract the resolver calls on a cache
//! miss, and the Gemini implementation of it.

use async_trait::async_trait;
use nst_core::{Chapter, ChapterQuery, ContentRequest, LessonContent, NstResult};
use std::sync::Arc;

pub mod prompt;
pub mod providers;

pub use providers::{GeminiClient, GeminiContentProvider};

// ============================================================================
// CONTENT GENERATOR TRAIT
// ============================================================================

/// External service that produces lesson content.
///
/// Implementations must be thread-safe (Send + Sync). Errors are reported as
/// `NstError::Generation`; callers do not retry.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate the content for one lesson request.
    async fn generate(&self, request: &ContentRequest) -> NstResult<LessonContent>;

    /// List the chapters of a subject.
    async fn list_chapters(&self, query: &ChapterQuery) -> NstResult<Vec<Chapter>>;

    /// Short provider identifier used in logs.
    fn provider_name(&self) -> &str;
}

#[async_trait]
impl<T: ContentGenerator + ?Sized> ContentGenerator for Arc<T> {
    async fn generate(&self, request: &ContentRequest) -> NstResult<LessonContent> {
        (**self).generate(request).await
    }

    async fn list_chapters(&self, query: &ChapterQuery) -> NstResult<Vec<Chapter>> {
        (**self).list_chapters(query).await
    }

    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }
}
