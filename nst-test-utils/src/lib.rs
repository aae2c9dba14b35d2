//! NST Test Utilities
//!
//! Shared test infrastructure for the NST workspace:
//! - Mock content generator with call counting and scripted failures
//! - Store wrappers that inject failures and latency
//! - Fixtures for common requests, users and gift codes
//! - Proptest generators for requests, raw keys and code input

pub use nst_storage::{MemoryDocumentStore, MemoryLocalCache, MemoryTreeStore};

pub use fixtures::*;
pub use mocks::*;

// ============================================================================
// MOCKS
// ============================================================================

pub mod mocks {
    //! Stand-ins for the generator and the remote stores.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use nst_core::{
        Chapter, ChapterQuery, ContentRequest, GenerationError, LessonContent, NstResult,
        StorageError, Tier,
    };
    use nst_llm::ContentGenerator;
    use nst_storage::{DocumentStore, DocumentWrite, ETag, TreeStore, Versioned};
    use serde_json::{json, Map, Value};
    use tokio::sync::watch;

    /// Deterministic generator that counts its calls.
    #[derive(Debug, Default)]
    pub struct MockContentGenerator {
        calls: AtomicUsize,
        chapter_calls: AtomicUsize,
        delay: Option<Duration>,
        always_fail: Option<String>,
        fail_next: Mutex<Option<String>>,
    }

    impl MockContentGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        /// A generator whose every call fails with `reason`.
        pub fn failing(reason: impl Into<String>) -> Self {
            Self {
                always_fail: Some(reason.into()),
                ..Self::default()
            }
        }

        /// Sleep this long inside every call.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Fail only the next generation call.
        pub fn fail_next(&self, reason: impl Into<String>) {
            if let Ok(mut slot) = self.fail_next.lock() {
                *slot = Some(reason.into());
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn chapter_calls(&self) -> usize {
            self.chapter_calls.load(Ordering::SeqCst)
        }

        fn scripted_failure(&self) -> Option<String> {
            let once = self.fail_next.lock().ok().and_then(|mut slot| slot.take());
            once.or_else(|| self.always_fail.clone())
        }
    }

    #[async_trait]
    impl ContentGenerator for MockContentGenerator {
        async fn generate(&self, request: &ContentRequest) -> NstResult<LessonContent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(reason) = self.scripted_failure() {
                return Err(GenerationError::GenerationFailed { reason }.into());
            }
            Ok(LessonContent::new(json!({
                "title": request.chapter.title,
                "content": format!("Notes for {}", request.key()),
                "type": request.content_type.as_str(),
                "language": request.language.as_str(),
            })))
        }

        async fn list_chapters(&self, query: &ChapterQuery) -> NstResult<Vec<Chapter>> {
            self.chapter_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = self.always_fail.clone() {
                return Err(GenerationError::GenerationFailed { reason }.into());
            }
            Ok((1..=3)
                .map(|i| Chapter::new(format!("ch-{}", i), format!("{} chapter {}", query.subject, i)))
                .collect())
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    /// Failure and latency switches shared by the flaky wrappers.
    #[derive(Debug, Default)]
    struct Faults {
        calls: AtomicUsize,
        fail_all: AtomicBool,
        fail_next: AtomicUsize,
        latency: Mutex<Option<Duration>>,
    }

    impl Faults {
        async fn enter(&self, tier: Tier) -> NstResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let latency = self.latency.lock().ok().and_then(|l| *l);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let one_shot = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if one_shot || self.fail_all.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable {
                    tier,
                    reason: "injected failure".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    macro_rules! fault_controls {
        ($name:ident) => {
            impl $name {
                /// Calls made through this wrapper, failed ones included.
                pub fn calls(&self) -> usize {
                    self.faults.calls.load(Ordering::SeqCst)
                }

                pub fn fail_all(&self, fail: bool) {
                    self.faults.fail_all.store(fail, Ordering::SeqCst);
                }

                /// Fail the next `n` calls.
                pub fn fail_next(&self, n: usize) {
                    self.faults.fail_next.store(n, Ordering::SeqCst);
                }

                pub fn set_latency(&self, latency: Option<Duration>) {
                    if let Ok(mut slot) = self.faults.latency.lock() {
                        *slot = latency;
                    }
                }
            }
        };
    }

    /// Document store wrapper with injectable failures.
    pub struct FlakyDocumentStore {
        inner: Arc<dyn DocumentStore>,
        faults: Faults,
    }

    impl FlakyDocumentStore {
        pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
            Self {
                inner,
                faults: Faults::default(),
            }
        }
    }

    fault_controls!(FlakyDocumentStore);

    #[async_trait]
    impl DocumentStore for FlakyDocumentStore {
        async fn get_doc(&self, collection: &str, id: &str) -> NstResult<Option<Value>> {
            self.faults.enter(Tier::Primary).await?;
            self.inner.get_doc(collection, id).await
        }

        async fn set_doc(
            &self,
            collection: &str,
            id: &str,
            write: DocumentWrite,
            merge: bool,
        ) -> NstResult<()> {
            self.faults.enter(Tier::Primary).await?;
            self.inner.set_doc(collection, id, write, merge).await
        }

        async fn update_doc(&self, collection: &str, id: &str, write: DocumentWrite) -> NstResult<()> {
            self.faults.enter(Tier::Primary).await?;
            self.inner.update_doc(collection, id, write).await
        }
    }

    /// Tree store wrapper with injectable failures.
    pub struct FlakyTreeStore {
        inner: Arc<dyn TreeStore>,
        faults: Faults,
    }

    impl FlakyTreeStore {
        pub fn new(inner: Arc<dyn TreeStore>) -> Self {
            Self {
                inner,
                faults: Faults::default(),
            }
        }
    }

    fault_controls!(FlakyTreeStore);

    #[async_trait]
    impl TreeStore for FlakyTreeStore {
        async fn get(&self, path: &str) -> NstResult<Option<Value>> {
            self.faults.enter(Tier::Secondary).await?;
            self.inner.get(path).await
        }

        async fn set(&self, path: &str, value: Value) -> NstResult<()> {
            self.faults.enter(Tier::Secondary).await?;
            self.inner.set(path, value).await
        }

        async fn update(&self, path: &str, children: Map<String, Value>) -> NstResult<()> {
            self.faults.enter(Tier::Secondary).await?;
            self.inner.update(path, children).await
        }

        async fn get_versioned(&self, path: &str) -> NstResult<Versioned> {
            self.faults.enter(Tier::Secondary).await?;
            self.inner.get_versioned(path).await
        }

        async fn set_if_match(&self, path: &str, value: Value, expected: &ETag) -> NstResult<bool> {
            self.faults.enter(Tier::Secondary).await?;
            self.inner.set_if_match(path, value, expected).await
        }

        fn watch_connected(&self) -> watch::Receiver<bool> {
            self.inner.watch_connected()
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for NST inputs.

    use nst_core::{Board, Chapter, ClassLevel, ContentRequest, ContentType, Language, Stream};
    use proptest::prelude::*;

    pub fn arb_board() -> impl Strategy<Value = Board> {
        prop_oneof![Just(Board::Cbse), Just(Board::Bseb)]
    }

    pub fn arb_stream() -> impl Strategy<Value = Stream> {
        prop_oneof![Just(Stream::Science), Just(Stream::Commerce), Just(Stream::Arts)]
    }

    pub fn arb_content_type() -> impl Strategy<Value = ContentType> {
        prop_oneof![
            Just(ContentType::Notes),
            Just(ContentType::PremiumNotes),
            Just(ContentType::Mcq),
            Just(ContentType::Video),
        ]
    }

    pub fn arb_class_level() -> impl Strategy<Value = ClassLevel> {
        (ClassLevel::MIN..=ClassLevel::MAX)
            .prop_filter_map("class level in range", |level| ClassLevel::new(level).ok())
    }

    /// Valid requests; subjects and chapter ids may contain key-reserved characters.
    pub fn arb_content_request() -> impl Strategy<Value = ContentRequest> {
        (
            arb_board(),
            arb_class_level(),
            arb_stream(),
            "[A-Za-z][A-Za-z .#$]{0,15}",
            "[a-z0-9][a-z0-9.\\-\\[\\]]{0,10}",
            arb_content_type(),
            any::<bool>(),
        )
            .prop_filter_map(
                "request must validate",
                |(board, class_level, stream, subject, chapter_id, content_type, hindi)| {
                    let chapter = Chapter::new(chapter_id.clone(), format!("Chapter {}", chapter_id));
                    let request =
                        ContentRequest::new(board, class_level, Some(stream), subject, chapter, content_type)
                            .ok()?;
                    Some(if hindi {
                        request.with_language(Language::Hindi)
                    } else {
                        request
                    })
                },
            )
    }

    /// Cache keys including the characters the remote tree store rejects.
    pub fn arb_raw_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.#$/?%\\[\\] -]{1,40}"
    }

    /// A code plus the way a student might type it: any case, padded with whitespace.
    pub fn arb_code_input() -> impl Strategy<Value = (String, String)> {
        ("[A-Z0-9]{4,8}", "[ \\t]{0,3}", "[ \\t\\n]{0,3}", any::<bool>()).prop_map(
            |(code, lead, trail, lower)| {
                let typed = if lower { code.to_lowercase() } else { code.clone() };
                (code, format!("{}{}{}", lead, typed, trail))
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made stores, requests, users and gift codes.

    use std::sync::Arc;

    use nst_core::{
        Board, Chapter, ClassLevel, ContentRequest, ContentType, GiftCode, NstResult, Stream, User,
    };
    use nst_storage::{code_path, MemoryDocumentStore, MemoryLocalCache, MemoryTreeStore, TreeStore};
    use serde_json::Value;

    /// One in-memory store per tier.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryStores {
        pub documents: Arc<MemoryDocumentStore>,
        pub tree: Arc<MemoryTreeStore>,
        pub local: Arc<MemoryLocalCache>,
    }

    impl MemoryStores {
        pub fn new() -> Self {
            Self::default()
        }
    }

    /// CBSE class 10 science notes for chapter `ch-1`.
    pub fn sample_request() -> ContentRequest {
        request_for(10, None, "ch-1")
    }

    /// A class 11 science request, which carries a stream in its key.
    pub fn senior_request() -> ContentRequest {
        request_for(11, Some(Stream::Science), "ch-2")
    }

    fn request_for(class: u8, stream: Option<Stream>, chapter_id: &str) -> ContentRequest {
        let class_level = match ClassLevel::new(class) {
            Ok(level) => level,
            Err(e) => panic!("fixture class {} is invalid: {}", class, e),
        };
        match ContentRequest::new(
            Board::Cbse,
            class_level,
            stream,
            "Science",
            Chapter::new(chapter_id, "Chemical Reactions and Equations"),
            ContentType::Notes,
        ) {
            Ok(request) => request,
            Err(e) => panic!("fixture request is invalid: {}", e),
        }
    }

    /// User `u1` with 10 credits and no redeemed codes.
    pub fn sample_user() -> User {
        User::new("u1", "Asha").with_credits(10)
    }

    /// Store a fresh code worth `amount` credits.
    pub async fn seed_code(tree: &dyn TreeStore, code: &str, amount: u64) -> NstResult<GiftCode> {
        let gift = GiftCode::new(code, amount);
        tree.set(&code_path(&gift.code), serde_json::to_value(&gift)?)
            .await?;
        Ok(gift)
    }

    /// Store an arbitrary record under `code`, for loosely-typed legacy data.
    pub async fn seed_raw_code(tree: &dyn TreeStore, code: &str, record: Value) -> NstResult<()> {
        tree.set(&code_path(code), record).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use nst_core::{normalize_code, CONTENT_KEY_PREFIX};
    use nst_llm::ContentGenerator;
    use nst_storage::{DocumentStore, TreeStore};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_generator_counts_and_fails_once() {
        let generator = MockContentGenerator::new();
        generator.fail_next("boom");
        assert!(generator.generate(&sample_request()).await.is_err());
        assert!(generator.generate(&sample_request()).await.is_ok());
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_flaky_store_injects_failures() {
        let stores = MemoryStores::new();
        let flaky = FlakyDocumentStore::new(stores.documents.clone());
        flaky.fail_next(1);
        assert!(flaky.get_doc("users", "u1").await.unwrap_err().is_tier_unavailable());
        assert!(flaky.get_doc("users", "u1").await.unwrap().is_none());
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_flaky_tree_latency() {
        let stores = MemoryStores::new();
        let flaky = FlakyTreeStore::new(stores.tree.clone());
        flaky.set_latency(Some(Duration::from_millis(30)));
        let started = std::time::Instant::now();
        flaky.get("anything").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_seed_code_is_readable() {
        let stores = MemoryStores::new();
        let tree: Arc<dyn TreeStore> = stores.tree.clone();
        let gift = seed_code(tree.as_ref(), "gift5", 5).await.unwrap();
        assert_eq!(gift.code, "GIFT5");
        assert!(stores.tree.get("redeem_codes/GIFT5").await.unwrap().is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_requests_have_prefixed_keys(request in arb_content_request()) {
            let key = request.key();
            prop_assert!(key.as_str().starts_with(CONTENT_KEY_PREFIX));
            prop_assert_eq!(request.stream.is_some(), request.class_level.requires_stream());
        }

        #[test]
        fn prop_code_input_normalizes_to_code((code, typed) in arb_code_input()) {
            prop_assert_eq!(normalize_code(&typed), code);
        }
    }
}
