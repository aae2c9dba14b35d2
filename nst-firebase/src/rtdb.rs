//! Realtime Database REST adapter.
//!
//! Every path maps to `{base}/{path}.json`. Conditional writes use the
//! database's ETag support: reads send `X-Firebase-ETag: true` and writes
//! send `if-match`, with HTTP 412 meaning another writer won.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nst_core::{ConfigError, NstResult, RemoteConfig, Tier};
use nst_storage::{ETag, TreeStore, Versioned};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::http::{build_client, mark_reachable, status_error, transport_error, unavailable};

const TIER: Tier = Tier::Secondary;

pub struct RtdbRestStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    connected: watch::Sender<bool>,
}

impl RtdbRestStore {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> NstResult<Self> {
        let (connected, _) = watch::channel(true);
        Ok(Self {
            client: build_client(TIER, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            connected,
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> NstResult<Self> {
        let base_url = remote
            .rtdb_url
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "NST_RTDB_URL".to_string(),
            })?;
        Self::new(base_url, remote.auth_token.clone(), remote.call_timeout)
    }

    fn url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{}.json", self.base_url, path)
        }
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> NstResult<reqwest::Response> {
        let response = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| transport_error(TIER, &self.connected, e))?;
        mark_reachable(&self.connected);
        Ok(response)
    }

    async fn read_json(response: reqwest::Response) -> NstResult<Option<Value>> {
        let value: Value = response
            .json()
            .await
            .map_err(|e| unavailable(TIER, format!("invalid response body: {}", e)))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Probe the server once and update the connection signal.
    pub async fn probe(&self) -> bool {
        let request = self
            .client
            .get(self.url(""))
            .query(&[("shallow", "true")]);
        // Any HTTP answer, even a rules rejection, means the server is reachable.
        self.send(request).await.is_ok()
    }

    /// Probe every `interval` until `shutdown` flips to true.
    pub fn spawn_connectivity_probe(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reachable = store.probe().await;
                        tracing::trace!(reachable, "realtime database probe");
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl TreeStore for RtdbRestStore {
    async fn get(&self, path: &str) -> NstResult<Option<Value>> {
        let response = self.send(self.client.get(self.url(path))).await?;
        if !response.status().is_success() {
            return Err(status_error(TIER, response).await);
        }
        Self::read_json(response).await
    }

    async fn set(&self, path: &str, value: Value) -> NstResult<()> {
        let response = self
            .send(self.client.put(self.url(path)).json(&value))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(TIER, response).await);
        }
        Ok(())
    }

    async fn update(&self, path: &str, children: Map<String, Value>) -> NstResult<()> {
        let response = self
            .send(self.client.patch(self.url(path)).json(&children))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(TIER, response).await);
        }
        Ok(())
    }

    async fn get_versioned(&self, path: &str) -> NstResult<Versioned> {
        let response = self
            .send(
                self.client
                    .get(self.url(path))
                    .header("X-Firebase-ETag", "true"),
            )
            .await?;
        if !response.status().is_success() {
            return Err(status_error(TIER, response).await);
        }
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| ETag(v.to_string()))
            .ok_or_else(|| unavailable(TIER, "response carried no ETag"))?;
        let value = Self::read_json(response).await?;
        Ok(Versioned { value, etag })
    }

    async fn set_if_match(&self, path: &str, value: Value, expected: &ETag) -> NstResult<bool> {
        let response = self
            .send(
                self.client
                    .put(self.url(path))
                    .header(reqwest::header::IF_MATCH, expected.as_str())
                    .json(&value),
            )
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::PRECONDITION_FAILED => {
                tracing::debug!(path, "conditional write lost");
                Ok(false)
            }
            _ => Err(status_error(TIER, response).await),
        }
    }

    fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

impl std::fmt::Debug for RtdbRestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtdbRestStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
