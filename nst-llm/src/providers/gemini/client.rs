//! Gemini HTTP client with key rotation and rate limiting

use super::types::{ApiError, GenerateContentRequest, GenerateContentResponse};
use nst_core::{GenerationError, GeneratorConfig, NstResult};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

const PROVIDER: &str = "gemini";

/// Fallback wait reported when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

/// Gemini API client.
///
/// Requests are bounded by a semaphore. Keys are used round-robin, and a key
/// that is throttled or rejected is skipped in favor of the next one until
/// every key has been tried once.
pub struct GeminiClient {
    client: Client,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
}

enum Attempt {
    Done(GenerateContentResponse),
    /// This key cannot serve the request; try the next one.
    Rotate(GenerationError),
}

impl GeminiClient {
    pub fn new(config: &GeneratorConfig) -> NstResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::GenerationFailed {
                reason: format!("HTTP client setup failed: {}", e),
            })?;

        Ok(Self {
            client,
            api_keys: config.api_keys.clone(),
            next_key: AtomicUsize::new(0),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        })
    }

    /// Replace the key pool, e.g. after the settings record changed.
    pub fn with_api_keys(mut self, api_keys: Vec<String>) -> Self {
        self.api_keys = api_keys;
        self
    }

    pub fn key_count(&self) -> usize {
        self.api_keys.len()
    }

    /// Call `models/{model}:generateContent`.
    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> NstResult<GenerateContentResponse> {
        if self.api_keys.is_empty() {
            return Err(GenerationError::ProviderNotConfigured.into());
        }

        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            GenerationError::GenerationFailed {
                reason: format!("Rate limiter error: {}", e),
            }
        })?;

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let start = self.next_key.fetch_add(1, Ordering::Relaxed);
        let mut last_error = GenerationError::ProviderNotConfigured;

        for offset in 0..self.api_keys.len() {
            let index = (start + offset) % self.api_keys.len();
            match self.attempt(&url, &self.api_keys[index], request).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::Rotate(error) => {
                    tracing::warn!(key_index = index, error = %error, "gemini key unusable, rotating");
                    last_error = error;
                }
            }
        }

        Err(last_error.into())
    }

    async fn attempt(
        &self,
        url: &str,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> NstResult<Attempt> {
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: 0,
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed = response
                .json::<GenerateContentResponse>()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                })?;
            return Ok(Attempt::Done(parsed));
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = match serde_json::from_str::<ApiError>(&error_text) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_text,
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS => Ok(Attempt::Rotate(GenerationError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_ms,
            })),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Ok(Attempt::Rotate(GenerationError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    status: status.as_u16(),
                    message,
                }))
            }
            _ => Err(GenerationError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message,
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_keys", &format_args!("[{} REDACTED]", self.api_keys.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gemini::types::Content;
    use nst_core::NstError;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, keys: &[&str]) -> GeneratorConfig {
        GeneratorConfig {
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            base_url,
            ..GeneratorConfig::default()
        }
    }

    fn request() -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content::user("hello")],
            system_instruction: None,
            generation_config: None,
        }
    }

    fn ok_body(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
    }

    #[tokio::test]
    async fn test_no_keys_is_not_configured() {
        let client = GeminiClient::new(&config("http://unused".to_string(), &[])).unwrap();
        let err = client.generate_content("m", &request()).await.unwrap_err();
        assert!(matches!(
            err,
            NstError::Generation(GenerationError::ProviderNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_success_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/m:generateContent"))
            .and(query_param("key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("{\"a\":1}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(server.uri(), &["k1"])).unwrap();
        let response = client.generate_content("m", &request()).await.unwrap();
        assert_eq!(response.text().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_rate_limited_key_rotates_to_next() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("key", "k1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(query_param("key", "k2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(server.uri(), &["k1", "k2"])).unwrap();
        let response = client.generate_content("m", &request()).await.unwrap();
        assert_eq!(response.text().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_all_keys_throttled_reports_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(server.uri(), &["k1", "k2"])).unwrap();
        let err = client.generate_content("m", &request()).await.unwrap_err();
        assert!(matches!(
            err,
            NstError::Generation(GenerationError::RateLimited {
                retry_after_ms: 3000,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_server_error_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": 500, "message": "backend exploded", "status": "INTERNAL"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(server.uri(), &["k1", "k2"])).unwrap();
        match client.generate_content("m", &request()).await {
            Err(NstError::Generation(GenerationError::RequestFailed { status, message, .. })) => {
                assert_eq!(status, 500);
                assert_eq!(message, "backend exploded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_keys() {
        let client = GeminiClient::new(&config("http://x".to_string(), &["secret"])).unwrap();
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("secret"));
    }
}
