// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CouchDB HTTP client with basic auth.
//!
//! Two `reqwest` clients are kept: one with a request timeout for ordinary
//! calls, and one with only a connect timeout for the continuous change feed,
//! whose body never ends.

use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::types::{seq_to_string, BulkDocResult, ChangesResponse, PutResponse, ViewResponse};
use crate::domain::events::{ChangeEvent, ChangeKind, ChangeStream};
use crate::domain::repository::StoreError;

/// Long-poll wait requested from the server; below the client timeout.
const LONGPOLL_TIMEOUT_MS: u64 = 20_000;

#[derive(Clone)]
pub struct CouchClient {
    client: Client,
    stream_client: Client,
    /// Database URL including the database path (e.g. "http://localhost:5984/v2grid")
    db_url: String,
    user: String,
    password: String,
}

impl CouchClient {
    pub fn new(
        db_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, StoreError> {
        Self::with_timeout(db_url, user, password, Duration::from_secs(30))
    }

    /// Create client with custom request timeout
    pub fn with_timeout(
        db_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            db_url: db_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn db_url(&self) -> &str {
        &self.db_url
    }

    /// Last path segment of the database URL.
    pub fn db_name(&self) -> String {
        self.db_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .unwrap_or("couchdb")
            .to_string()
    }

    /// Build full URL for API endpoint
    pub(crate) fn build_url(&self, path: &str) -> String {
        if path.is_empty() {
            self.db_url.clone()
        } else {
            format!("{}/{}", self.db_url, path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.build_url(path))
            .basic_auth(&self.user, Some(&self.password))
    }

    async fn error_for(response: reqwest::Response, context: &str) -> StoreError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status));
        match status {
            StatusCode::CONFLICT => StoreError::Conflict(format!("{}: {}", context, body)),
            StatusCode::NOT_FOUND => StoreError::NotFound(format!("{}: {}", context, body)),
            s if s.is_server_error() => StoreError::Unavailable(format!("{}: {} {}", context, s, body)),
            s => StoreError::Database(format!("{}: {} {}", context, s, body)),
        }
    }

    /// Create the database if it does not exist.
    pub async fn ensure_database(&self) -> Result<(), StoreError> {
        let response = self.request(Method::PUT, "").send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::PRECONDITION_FAILED => Ok(()),
            _ => Err(Self::error_for(response, "create database").await),
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .request(Method::GET, "")
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "CouchDB returned status {}",
                response.status()
            )))
        }
    }

    /// Fetch a document, `None` on 404.
    pub async fn get_doc<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let response = self.request(Method::GET, id).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::error_for(response, &format!("get {}", id)).await),
        }
    }

    /// Fetch one specific revision of a document.
    pub async fn get_revision<T: DeserializeOwned>(&self, id: &str, rev: &str) -> Result<T, StoreError> {
        let response = self
            .request(Method::GET, id)
            .query(&[("rev", rev)])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_for(response, &format!("get {}?rev={}", id, rev)).await),
        }
    }

    /// Create or update a document. Returns the new revision.
    pub async fn put_doc<T: Serialize + ?Sized>(&self, id: &str, doc: &T) -> Result<String, StoreError> {
        let response = self.request(Method::PUT, id).json(doc).send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::OK => {
                let body: PutResponse = response.json().await?;
                Ok(body.rev.unwrap_or_default())
            }
            _ => Err(Self::error_for(response, &format!("put {}", id)).await),
        }
    }

    pub async fn bulk_docs(&self, docs: &[Value]) -> Result<Vec<BulkDocResult>, StoreError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .request(Method::POST, "_bulk_docs")
            .json(&serde_json::json!({ "docs": docs }))
            .send()
            .await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_for(response, "bulk docs").await),
        }
    }

    /// Query `_design/{design}/_view/{view}`. Parameters are passed verbatim.
    pub async fn query_view<K, V>(
        &self,
        design: &str,
        view: &str,
        params: &[(&str, String)],
    ) -> Result<ViewResponse<K, V>, StoreError>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let path = format!("_design/{}/_view/{}", design, view);
        let response = self.request(Method::GET, &path).query(params).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_for(response, &path).await),
        }
    }

    /// Invoke an update handler against `doc_id`. Returns the handler's JSON body.
    pub async fn call_update_handler(
        &self,
        design: &str,
        handler: &str,
        doc_id: &str,
        body: &Value,
    ) -> Result<Value, StoreError> {
        let path = format!("_design/{}/_update/{}/{}", design, handler, doc_id);
        let response = self.request(Method::PUT, &path).json(body).send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::OK => {
                let text = response.text().await?;
                Ok(serde_json::from_str(&text)?)
            }
            _ => Err(Self::error_for(response, &path).await),
        }
    }

    /// Upload a design document, carrying over the existing revision if any.
    pub async fn upsert_design_doc(&self, doc: &Value) -> Result<(), StoreError> {
        let id = doc
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Serialization("design document without _id".to_string()))?
            .to_string();

        let mut doc = doc.clone();
        if let Some(existing) = self.get_doc::<Value>(&id).await? {
            if let Some(rev) = existing.get("_rev") {
                doc["_rev"] = rev.clone();
            }
        }
        self.put_doc(&id, &doc).await?;
        debug!(design_doc = %id, "Design document uploaded");
        Ok(())
    }

    /// Block until a change passes the view filter, or the server-side wait expires.
    pub async fn changes_longpoll(
        &self,
        since: Option<&str>,
        filter_view: &str,
    ) -> Result<ChangesResponse, StoreError> {
        let mut params = vec![
            ("feed", "longpoll".to_string()),
            ("filter", "_view".to_string()),
            ("view", filter_view.to_string()),
            ("timeout", LONGPOLL_TIMEOUT_MS.to_string()),
        ];
        if let Some(since) = since {
            params.push(("since", since.to_string()));
        }
        let response = self.request(Method::GET, "_changes").query(&params).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_for(response, "longpoll changes").await),
        }
    }

    /// Open the continuous change feed from "now". Each decoded line becomes a
    /// `db_change` event. The reader task stops when the stream is dropped.
    pub async fn changes_continuous(&self) -> Result<ChangeStream, StoreError> {
        let response = self
            .stream_client
            .get(self.build_url("_changes"))
            .basic_auth(&self.user, Some(&self.password))
            .query(&[
                ("feed", "continuous"),
                ("include_docs", "true"),
                ("since", "now"),
                ("heartbeat", "10000"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, "continuous changes").await);
        }

        let (tx, rx) = mpsc::channel(256);
        let mut body = response.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = LineDecoder::default();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("[CouchDB] Change feed interrupted: {}", e);
                        break;
                    }
                };
                for line in decoder.push(&chunk) {
                    match serde_json::from_str::<Value>(&line) {
                        Ok(change) => {
                            if tx.send(ChangeEvent::new(ChangeKind::DbChange, change)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("[CouchDB] Error parsing change line {:?}: {}", line, e),
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Convenience for `last_seq` handling.
    pub fn last_seq(changes: &ChangesResponse) -> String {
        seq_to_string(&changes.last_seq)
    }
}

/// Splits a byte stream into complete, non-empty, trimmed lines. The trailing
/// partial line is kept until the next chunk completes it.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> CouchClient {
        CouchClient::new(url, "admin", "password").unwrap()
    }

    #[test]
    fn test_url_building() {
        let c = client("http://localhost:5984/v2grid/");
        assert_eq!(c.build_url(""), "http://localhost:5984/v2grid");
        assert_eq!(c.build_url("_bulk_docs"), "http://localhost:5984/v2grid/_bulk_docs");
        assert_eq!(c.build_url("/1-2"), "http://localhost:5984/v2grid/1-2");
        assert_eq!(c.db_name(), "v2grid");
    }

    #[test]
    fn test_line_decoder_handles_split_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"seq\":1").is_empty());
        let lines = decoder.push(b"}\n\n{\"seq\":2}\n{\"se");
        assert_eq!(lines, vec!["{\"seq\":1}".to_string(), "{\"seq\":2}".to_string()]);
        assert_eq!(decoder.push(b"q\":3}\n"), vec!["{\"seq\":3}".to_string()]);
    }

    #[tokio::test]
    async fn test_get_doc_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/grid/missing")
            .with_status(404)
            .with_body(r#"{"error":"not_found","reason":"missing"}"#)
            .create_async()
            .await;

        let c = client(&format!("{}/grid", server.url()));
        let doc: Option<Value> = c.get_doc("missing").await.unwrap();
        assert!(doc.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_conflict_maps_to_conflict_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/grid/A")
            .with_status(409)
            .with_body(r#"{"error":"conflict","reason":"Document update conflict."}"#)
            .create_async()
            .await;

        let c = client(&format!("{}/grid", server.url()));
        let err = c.put_doc("A", &serde_json::json!({"name": "A"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ensure_database_accepts_existing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/grid")
            .with_status(412)
            .with_body(r#"{"error":"file_exists"}"#)
            .create_async()
            .await;

        let c = client(&format!("{}/grid", server.url()));
        assert!(c.ensure_database().await.is_ok());
    }

    #[tokio::test]
    async fn test_continuous_feed_yields_db_change_events() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/grid/_changes")
            .match_query(mockito::Matcher::UrlEncoded("feed".into(), "continuous".into()))
            .with_status(200)
            .with_body("{\"seq\":\"1-a\",\"id\":\"0-0\"}\n\n{\"seq\":\"2-b\",\"id\":\"0-1\"}\n")
            .create_async()
            .await;

        let c = client(&format!("{}/grid", server.url()));
        let mut feed = c.changes_continuous().await.unwrap();
        let first = feed.next().await.unwrap();
        assert_eq!(first.kind, ChangeKind::DbChange);
        assert_eq!(first.payload["id"], "0-0");
        let second = feed.next().await.unwrap();
        assert_eq!(second.payload["seq"], "2-b");
        assert!(feed.next().await.is_none());
    }
}
