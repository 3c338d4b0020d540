//! Record store adapter contract.
//!
//! The loyalty data lives in a hosted realtime database as four keyed
//! collections of loose JSON records. Everything above this layer talks
//! through [`RecordStore`]; implementations are [`crate::rest::RestStore`]
//! for the hosted backend and [`crate::db::SqliteStore`] for a local file.
//! [`MemoryStore`] is the in-process reference implementation used by
//! tests.
//!
//! There is no transactional guarantee across collections: each fetch or
//! write stands alone and may fail alone.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The four logical collections of the loyalty system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Laundry orders. One record per job.
    Orders,
    /// Manual respect grants, append-only, keyed by creation timestamp.
    Grants,
    /// Respect redemptions, append-only, keyed by creation timestamp.
    Redemptions,
    /// Identity records joined to the other collections by email.
    Users,
}

impl Collection {
    /// Canonical name used in logs and local storage.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Grants => "grants",
            Collection::Redemptions => "redemptions",
            Collection::Users => "users",
        }
    }

    /// Path segment in the hosted database. The orders collection has
    /// always lived under `customers`; renaming it server-side would
    /// orphan every existing record.
    pub fn wire_path(self) -> &'static str {
        match self {
            Collection::Orders => "customers",
            Collection::Grants => "pointsHistory",
            Collection::Redemptions => "redemptions",
            Collection::Users => "users",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One stored record: its key plus a loose JSON body.
///
/// Bodies stay untyped because a decade of front-end writes left the
/// collections with drifting field names and stringly-typed numbers;
/// readers coerce defensively instead of rejecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub fields: Value,
}

impl Record {
    pub fn new(key: impl Into<String>, fields: Value) -> Self {
        Record {
            key: key.into(),
            fields,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Read/write access to the loyalty collections.
///
/// `fetch_by_field` is a single-field equality query (the only index the
/// hosted backend offers). `delete` is idempotent: removing an absent key
/// succeeds, matching the hosted backend.
pub trait RecordStore: Send + Sync {
    /// Fetch every record in a collection.
    fn fetch_all(
        &self,
        collection: Collection,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Fetch records where `fields[field] == value` (string equality).
    fn fetch_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Fetch one record by key.
    fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Create a record under a generated key and return it.
    fn create(
        &self,
        collection: Collection,
        fields: Value,
    ) -> impl Future<Output = Result<Record, StoreError>> + Send;

    /// Write a record under a caller-chosen key, replacing any existing
    /// body. Grants and redemptions use this with timestamp keys.
    fn put(
        &self,
        collection: Collection,
        key: &str,
        fields: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge `patch`'s top-level fields into an existing record.
    fn update(
        &self,
        collection: Collection,
        key: &str,
        patch: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a record by key.
    fn delete(
        &self,
        collection: Collection,
        key: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Generate a key for [`RecordStore::create`].
pub(crate) fn generated_key(collection: Collection) -> String {
    let prefix = match collection {
        Collection::Orders => "ord",
        Collection::Grants => "grant",
        Collection::Redemptions => "rdm",
        Collection::Users => "usr",
    };
    format!("{prefix}-{}", Uuid::new_v4())
}

/// True when `fields[field]` equals `value` as a trimmed string.
pub(crate) fn field_matches(fields: &Value, field: &str, value: &str) -> bool {
    fields
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.trim() == value)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// HashMap-backed [`RecordStore`] for tests and ephemeral tooling.
///
/// Keys iterate in sorted order, matching the hosted backend's key
/// ordering.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Collection, BTreeMap<String, Value>>>, StoreError> {
        self.collections
            .lock()
            .map_err(|e| StoreError::Transient(format!("memory store lock poisoned: {e}")))
    }
}

impl RecordStore for MemoryStore {
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        let map = self.lock()?;
        Ok(map
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| Record::new(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let map = self.lock()?;
        Ok(map
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, v)| field_matches(v, field, value))
                    .map(|(k, v)| Record::new(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>, StoreError> {
        let map = self.lock()?;
        Ok(map
            .get(&collection)
            .and_then(|records| records.get(key))
            .map(|v| Record::new(key, v.clone())))
    }

    async fn create(&self, collection: Collection, fields: Value) -> Result<Record, StoreError> {
        let key = generated_key(collection);
        let mut map = self.lock()?;
        map.entry(collection)
            .or_default()
            .insert(key.clone(), fields.clone());
        Ok(Record::new(key, fields))
    }

    async fn put(&self, collection: Collection, key: &str, fields: Value) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.entry(collection).or_default().insert(key.to_string(), fields);
        Ok(())
    }

    async fn update(&self, collection: Collection, key: &str, patch: Value) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        let records = map.entry(collection).or_default();
        let existing = records.get_mut(key).ok_or_else(|| StoreError::NotFound {
            collection: collection.name(),
            key: key.to_string(),
        })?;
        if let (Some(dst), Some(src)) = (existing.as_object_mut(), patch.as_object()) {
            for (k, v) in src {
                if v.is_null() {
                    dst.remove(k);
                } else {
                    dst.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        if let Some(records) = map.get_mut(&collection) {
            records.remove(key);
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let store = MemoryStore::new();
        let created = store
            .create(
                Collection::Orders,
                serde_json::json!({ "email": "vito@example.com", "points": 5 }),
            )
            .await
            .unwrap();
        assert!(created.key.starts_with("ord-"));

        let fetched = store.get(Collection::Orders, &created.key).await.unwrap();
        assert_eq!(fetched.unwrap().fields["points"], 5);
    }

    #[tokio::test]
    async fn fetch_by_field_filters_on_equality() {
        let store = MemoryStore::new();
        store
            .put(
                Collection::Orders,
                "a",
                serde_json::json!({ "email": "vito@example.com" }),
            )
            .await
            .unwrap();
        store
            .put(
                Collection::Orders,
                "b",
                serde_json::json!({ "email": "carmela@example.com" }),
            )
            .await
            .unwrap();

        let hits = store
            .fetch_by_field(Collection::Orders, "email", "vito@example.com")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
    }

    #[tokio::test]
    async fn update_merges_without_clobbering_other_fields() {
        let store = MemoryStore::new();
        store
            .put(
                Collection::Orders,
                "a",
                serde_json::json!({ "email": "vito@example.com", "points": 3, "ready": false }),
            )
            .await
            .unwrap();
        store
            .update(Collection::Orders, "a", serde_json::json!({ "ready": true }))
            .await
            .unwrap();

        let rec = store.get(Collection::Orders, "a").await.unwrap().unwrap();
        assert_eq!(rec.fields["ready"], true);
        assert_eq!(rec.fields["points"], 3);
    }

    #[tokio::test]
    async fn update_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(Collection::Orders, "nope", serde_json::json!({ "ready": true }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .put(Collection::Users, "u1", serde_json::json!({ "name": "Vito" }))
            .await
            .unwrap();
        store.delete(Collection::Users, "u1").await.unwrap();
        store.delete(Collection::Users, "u1").await.unwrap();
        assert!(store.get(Collection::Users, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_all_returns_keys_in_sorted_order() {
        let store = MemoryStore::new();
        for key in ["b", "a", "c"] {
            store
                .put(Collection::Grants, key, serde_json::json!({ "pointsAdded": 1 }))
                .await
                .unwrap();
        }
        let all = store.fetch_all(Collection::Grants).await.unwrap();
        let keys: Vec<_> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
