//! Cloud Firestore REST adapter.
//!
//! Reads go to `documents/{collection}/{id}`. Every write is a single-entry
//! `documents:commit` so plain fields, server timestamps and array unions
//! land atomically.

use std::time::Duration;

use async_trait::async_trait;
use nst_core::{ConfigError, NstResult, RemoteConfig, StorageError, Tier};
use nst_storage::{DocumentStore, DocumentWrite};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use tokio::sync::watch;

use crate::codec::{decode_fields, encode_fields, encode_value, leaf_paths, quote_segment};
use crate::http::{
    build_client, is_not_found, mark_reachable, status_error, transport_error, unavailable,
};

const TIER: Tier = Tier::Primary;

/// How a commit treats fields that are not part of the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Replace,
    Merge,
    /// Merge into an existing document; fails if it is missing.
    Update,
}

pub struct FirestoreRestStore {
    client: Client,
    endpoint: String,
    database_path: String,
    auth_token: Option<String>,
    connected: watch::Sender<bool>,
}

impl FirestoreRestStore {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: &str,
        database: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> NstResult<Self> {
        let (connected, _) = watch::channel(true);
        Ok(Self {
            client: build_client(TIER, timeout)?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            database_path: format!("projects/{}/databases/{}", project_id, database),
            auth_token,
            connected,
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> NstResult<Self> {
        let project_id =
            remote
                .firestore_project_id
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "NST_FIRESTORE_PROJECT_ID".to_string(),
                })?;
        Self::new(
            remote.firestore_endpoint.clone(),
            project_id,
            &remote.firestore_database,
            remote.auth_token.clone(),
            remote.call_timeout,
        )
    }

    /// Resource name of a document, as used inside commit bodies.
    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path, collection, id)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.endpoint, self.document_name(collection, id))
    }

    fn commit_url(&self) -> String {
        format!("{}/{}/documents:commit", self.endpoint, self.database_path)
    }

    /// Connection state as last observed by a request.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
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

    fn commit_body(&self, collection: &str, id: &str, write: &DocumentWrite, mode: WriteMode) -> Value {
        let mut entry = Map::new();
        entry.insert(
            "update".to_string(),
            json!({
                "name": self.document_name(collection, id),
                "fields": encode_fields(&write.fields),
            }),
        );

        let mask = match mode {
            WriteMode::Replace => None,
            WriteMode::Merge => Some(leaf_paths(&write.fields)),
            WriteMode::Update => Some(write.fields.keys().map(|k| quote_segment(k)).collect()),
        };
        if let Some(paths) = mask {
            entry.insert("updateMask".to_string(), json!({ "fieldPaths": paths }));
        }

        let mut transforms: Vec<Value> = write
            .server_timestamps
            .iter()
            .map(|field| {
                json!({
                    "fieldPath": quote_segment(field),
                    "setToServerValue": "REQUEST_TIME",
                })
            })
            .collect();
        transforms.extend(write.array_unions.iter().map(|(field, elements)| {
            json!({
                "fieldPath": quote_segment(field),
                "appendMissingElements": {
                    "values": elements.iter().map(encode_value).collect::<Vec<_>>(),
                },
            })
        }));
        if !transforms.is_empty() {
            entry.insert("updateTransforms".to_string(), Value::Array(transforms));
        }

        if mode == WriteMode::Update {
            entry.insert("currentDocument".to_string(), json!({ "exists": true }));
        }

        json!({ "writes": [Value::Object(entry)] })
    }

    async fn commit(
        &self,
        collection: &str,
        id: &str,
        write: &DocumentWrite,
        mode: WriteMode,
    ) -> NstResult<()> {
        let body = self.commit_body(collection, id, write, mode);
        let response = self.send(self.client.post(self.commit_url()).json(&body)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if mode == WriteMode::Update && is_not_found(status) {
            return Err(StorageError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }
            .into());
        }
        Err(status_error(TIER, response).await)
    }
}

#[async_trait]
impl DocumentStore for FirestoreRestStore {
    async fn get_doc(&self, collection: &str, id: &str) -> NstResult<Option<Value>> {
        let response = self
            .send(self.client.get(self.document_url(collection, id)))
            .await?;
        let status = response.status();
        if is_not_found(status) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(TIER, response).await);
        }
        let document: Value = response
            .json()
            .await
            .map_err(|e| unavailable(TIER, format!("invalid document body: {}", e)))?;
        let fields = document
            .get("fields")
            .and_then(Value::as_object)
            .map(decode_fields)
            .unwrap_or_default();
        Ok(Some(Value::Object(fields)))
    }

    async fn set_doc(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
        merge: bool,
    ) -> NstResult<()> {
        let mode = if merge { WriteMode::Merge } else { WriteMode::Replace };
        self.commit(collection, id, &write, mode).await
    }

    async fn update_doc(&self, collection: &str, id: &str, write: DocumentWrite) -> NstResult<()> {
        self.commit(collection, id, &write, WriteMode::Update).await
    }
}

impl std::fmt::Debug for FirestoreRestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreRestStore")
            .field("endpoint", &self.endpoint)
            .field("database_path", &self.database_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nst_core::NstError;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/projects/demo/databases/(default)/documents";

    fn store(server: &MockServer) -> FirestoreRestStore {
        FirestoreRestStore::new(
            server.uri(),
            "demo",
            "(default)",
            Some("token-1".to_string()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_commit_body() {
        let store = FirestoreRestStore::new("http://x", "demo", "(default)", None, Duration::from_secs(1)).unwrap();
        let write = DocumentWrite::new()
            .set("credits", 15)
            .set("profile", json!({"board": "CBSE"}))
            .server_timestamp("updatedAt")
            .array_union("redeemedCodes", vec![json!("GIFT5")]);
        let body = store.commit_body("users", "u1", &write, WriteMode::Merge);
        let entry = &body["writes"][0];

        assert_eq!(
            entry["update"]["name"],
            json!("projects/demo/databases/(default)/documents/users/u1")
        );
        assert_eq!(entry["update"]["fields"]["credits"], json!({"integerValue": "15"}));
        let mut mask: Vec<String> =
            serde_json::from_value(entry["updateMask"]["fieldPaths"].clone()).unwrap();
        mask.sort();
        assert_eq!(mask, vec!["credits", "profile.board"]);
        assert_eq!(
            entry["updateTransforms"],
            json!([
                {"fieldPath": "updatedAt", "setToServerValue": "REQUEST_TIME"},
                {"fieldPath": "redeemedCodes", "appendMissingElements": {"values": [{"stringValue": "GIFT5"}]}}
            ])
        );
        assert!(entry.get("currentDocument").is_none());
    }

    #[test]
    fn test_replace_and_update_bodies() {
        let store = FirestoreRestStore::new("http://x", "demo", "(default)", None, Duration::from_secs(1)).unwrap();
        let write = DocumentWrite::new().set("status", "active");

        let replace = store.commit_body("users", "u1", &write, WriteMode::Replace);
        assert!(replace["writes"][0].get("updateMask").is_none());

        let update = store.commit_body("users", "u1", &write, WriteMode::Update);
        assert_eq!(update["writes"][0]["updateMask"]["fieldPaths"], json!(["status"]));
        assert_eq!(update["writes"][0]["currentDocument"], json!({"exists": true}));
    }

    #[tokio::test]
    async fn test_get_doc_decodes_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/users/u1", DOCS)))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/databases/(default)/documents/users/u1",
                "fields": {
                    "credits": {"integerValue": "10"},
                    "redeemedCodes": {"arrayValue": {"values": [{"stringValue": "A"}]}}
                }
            })))
            .mount(&server)
            .await;

        let doc = store(&server).get_doc("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc, json!({"credits": 10, "redeemedCodes": ["A"]}));
    }

    #[tokio::test]
    async fn test_get_missing_doc_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Document not found", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        assert!(store(&server).get_doc("content", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_doc_commits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:commit", DOCS)))
            .and(body_partial_json(json!({
                "writes": [{"update": {"fields": {"title": {"stringValue": "Metals"}}}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writeResults": [{}]})))
            .expect(1)
            .mount(&server)
            .await;

        let write = DocumentWrite::new().set("title", "Metals");
        store(&server).set_doc("content", "k", write, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_doc_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "No document to update", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .update_doc("users", "ghost", DocumentWrite::new().set("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NstError::Storage(StorageError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_keeps_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .set_doc("content", "k", DocumentWrite::new(), true)
            .await
            .unwrap_err();
        assert!(err.is_tier_unavailable());
        assert!(err.to_string().contains("insufficient permissions"));
    }
}
