//! Hosted realtime database client.
//!
//! The production collections live in a hosted realtime database whose
//! REST surface maps a path to a JSON tree: a collection is an object of
//! `key -> record`, a record is the subtree under its key. Reads and
//! writes are plain HTTP with an optional `auth` token; equality queries
//! use `orderBy`/`equalTo` against a server-side index.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Collection, Record, RecordStore};

/// Default timeout for database requests. A stalled call otherwise
/// stalls whatever screen is waiting on it indefinitely.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for the hosted database.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Root URL of the database, with or without scheme.
    pub database_url: String,
    /// Legacy database secret or a current ID token, sent as `auth`.
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        RestConfig {
            database_url: database_url.into(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Normalise the database URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_database_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn classify_request_error(url: &str, err: &reqwest::Error) -> StoreError {
    if err.is_timeout() {
        return StoreError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_connect() {
        return StoreError::Transient(format!("cannot reach the database at {url}"));
    }
    StoreError::Transient(format!("network error communicating with {url}: {err}"))
}

fn classify_status(collection: Collection, key: Option<&str>, status: StatusCode) -> StoreError {
    match status.as_u16() {
        401 | 403 => StoreError::Denied("database credentials were rejected".to_string()),
        404 => StoreError::NotFound {
            collection: collection.name(),
            key: key.unwrap_or_default().to_string(),
        },
        s if s >= 500 => StoreError::Transient(format!("database server error (HTTP {s})")),
        s => StoreError::Transient(format!("unexpected response from the database (HTTP {s})")),
    }
}

/// Flatten a collection tree into records.
///
/// The database returns `null` for an empty path, an object keyed by
/// record key, or an array when a collection's keys look like small
/// integers (array holes come back as `null`).
fn records_from_tree(tree: Value) -> Vec<Record> {
    match tree {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, fields)| Record::new(key, fields))
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, fields)| Record::new(i.to_string(), fields))
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`RecordStore`] backed by the hosted realtime database.
#[derive(Debug)]
pub struct RestStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let base_url = normalize_database_url(&config.database_url);
        if base_url.is_empty() {
            return Err(StoreError::Denied(
                "database URL is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transient(format!("failed to create HTTP client: {e}")))?;

        Ok(RestStore {
            client,
            base_url,
            auth_token: config.auth_token,
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}.json", self.base_url, collection.wire_path())
    }

    fn record_url(&self, collection: Collection, key: &str) -> String {
        format!("{}/{}/{}.json", self.base_url, collection.wire_path(), key)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.query(&[("auth", token.as_str())]),
            None => req,
        }
    }

    /// Send a request and parse the JSON body. Empty bodies come back as
    /// `Null`.
    async fn send(
        &self,
        req: RequestBuilder,
        url: &str,
        collection: Collection,
        key: Option<&str>,
    ) -> Result<Value, StoreError> {
        let resp = self
            .with_auth(req)
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(collection, key, status));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| classify_request_error(url, &e))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| StoreError::Transient(format!("invalid JSON from the database: {e}")))
    }
}

impl RecordStore for RestStore {
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        let url = self.collection_url(collection);
        let tree = self
            .send(self.client.get(&url), &url, collection, None)
            .await?;
        let records = records_from_tree(tree);
        debug!(collection = %collection, count = records.len(), "fetched collection");
        Ok(records)
    }

    async fn fetch_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let url = self.collection_url(collection);
        // orderBy/equalTo take JSON-encoded operands, quotes included.
        let req = self.client.get(&url).query(&[
            ("orderBy", format!("\"{field}\"")),
            ("equalTo", format!("\"{value}\"")),
        ]);
        let tree = self.send(req, &url, collection, None).await?;
        Ok(records_from_tree(tree))
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>, StoreError> {
        let url = self.record_url(collection, key);
        let tree = self
            .send(self.client.get(&url), &url, collection, Some(key))
            .await?;
        Ok(match tree {
            Value::Null => None,
            fields => Some(Record::new(key, fields)),
        })
    }

    async fn create(&self, collection: Collection, fields: Value) -> Result<Record, StoreError> {
        let url = self.collection_url(collection);
        let resp = self
            .send(
                self.client.post(&url).json(&fields),
                &url,
                collection,
                None,
            )
            .await?;
        let key = resp
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                StoreError::Transient("database create did not return a record key".to_string())
            })?
            .to_string();
        Ok(Record::new(key, fields))
    }

    async fn put(&self, collection: Collection, key: &str, fields: Value) -> Result<(), StoreError> {
        let url = self.record_url(collection, key);
        self.send(
            self.client.put(&url).json(&fields),
            &url,
            collection,
            Some(key),
        )
        .await?;
        Ok(())
    }

    async fn update(&self, collection: Collection, key: &str, patch: Value) -> Result<(), StoreError> {
        let url = self.record_url(collection, key);
        self.send(
            self.client.patch(&url).json(&patch),
            &url,
            collection,
            Some(key),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let url = self.record_url(collection, key);
        self.send(self.client.delete(&url), &url, collection, Some(key))
            .await?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_https_and_strips_slashes() {
        assert_eq!(
            normalize_database_url("laundry.example-db.app/"),
            "https://laundry.example-db.app"
        );
        assert_eq!(
            normalize_database_url("https://laundry.example-db.app///"),
            "https://laundry.example-db.app"
        );
    }

    #[test]
    fn normalize_keeps_localhost_on_http() {
        assert_eq!(
            normalize_database_url("localhost:9000"),
            "http://localhost:9000"
        );
        assert_eq!(
            normalize_database_url("127.0.0.1:9000/"),
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn normalize_of_empty_stays_empty() {
        assert_eq!(normalize_database_url("   "), "");
    }

    #[test]
    fn record_urls_use_the_wire_paths() {
        let store = RestStore::new(RestConfig::new("laundry.example-db.app")).unwrap();
        assert_eq!(
            store.collection_url(Collection::Orders),
            "https://laundry.example-db.app/customers.json"
        );
        assert_eq!(
            store.record_url(Collection::Grants, "1700000000000"),
            "https://laundry.example-db.app/pointsHistory/1700000000000.json"
        );
    }

    #[test]
    fn empty_url_is_rejected_up_front() {
        let err = RestStore::new(RestConfig::new("")).unwrap_err();
        assert!(matches!(err, StoreError::Denied(_)));
    }

    #[test]
    fn tree_flattening_handles_null_object_and_array() {
        assert!(records_from_tree(Value::Null).is_empty());

        let records = records_from_tree(serde_json::json!({
            "a": { "points": 1 },
            "b": { "points": 2 },
        }));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "a");

        let records = records_from_tree(serde_json::json!([
            null,
            { "points": 1 },
        ]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "1");
    }

    #[test]
    fn status_classification_matches_the_taxonomy() {
        assert!(matches!(
            classify_status(Collection::Orders, None, StatusCode::UNAUTHORIZED),
            StoreError::Denied(_)
        ));
        assert!(matches!(
            classify_status(Collection::Orders, Some("k"), StatusCode::NOT_FOUND),
            StoreError::NotFound { key, .. } if key == "k"
        ));
        assert!(matches!(
            classify_status(Collection::Orders, None, StatusCode::INTERNAL_SERVER_ERROR),
            StoreError::Transient(_)
        ));
    }
}
