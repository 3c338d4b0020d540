//! Local SQLite record store.
//!
//! Uses rusqlite with WAL mode. Records keep their loose JSON bodies in a
//! single table; field-equality queries go through `json_extract` so the
//! local store answers the same adapter contract as the hosted database.
//! Used for on-premise installs and as the durable fixture store in
//! integration setups.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::{generated_key, Collection, Record, RecordStore};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// [`RecordStore`] backed by a local SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `{data_dir}/ledger.db`.
    ///
    /// Creates the directory if needed, opens the connection, sets
    /// pragmas, and runs any pending migrations. On corruption or open
    /// failure, deletes the file and retries once.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)
            .map_err(|e| StoreError::Transient(format!("failed to create data dir: {e}")))?;

        let db_path = data_dir.join("ledger.db");
        info!("Opening database at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Database open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path).map_err(|e| {
                    StoreError::Transient(format!("database open failed after retry: {e}"))
                })?
            }
        };

        run_migrations(&conn)?;
        info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Ephemeral in-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Transient(format!("sqlite open: {e}")))?;
        run_migrations(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Transient(format!("database lock poisoned: {e}")))
    }
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| StoreError::Transient(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");
    if current < 1 {
        migrate_v1(conn)?;
    }
    Ok(())
}

/// Migration v1: the records table.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            record_key TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (collection, record_key)
        );
        CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| StoreError::Transient(format!("migrate v1: {e}")))?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(String, String)> {
    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
}

fn parse_body(collection: Collection, key: &str, body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body).map_err(|e| {
        StoreError::Transient(format!(
            "corrupt record body {collection}/{key}: {e}"
        ))
    })
}

impl RecordStore for SqliteStore {
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_key, body FROM records
                 WHERE collection = ?1
                 ORDER BY record_key",
            )
            .map_err(|e| StoreError::Transient(format!("fetch_all prepare: {e}")))?;
        let rows = stmt
            .query_map(params![collection.name()], row_to_record)
            .map_err(|e| StoreError::Transient(format!("fetch_all query: {e}")))?
            .filter_map(|r| r.ok());

        let mut records = Vec::new();
        for (key, body) in rows {
            records.push(Record {
                fields: parse_body(collection, &key, &body)?,
                key,
            });
        }
        Ok(records)
    }

    async fn fetch_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_key, body FROM records
                 WHERE collection = ?1
                   AND trim(json_extract(body, ?2)) = ?3
                 ORDER BY record_key",
            )
            .map_err(|e| StoreError::Transient(format!("fetch_by_field prepare: {e}")))?;
        let path = format!("$.{field}");
        let rows = stmt
            .query_map(params![collection.name(), path, value], row_to_record)
            .map_err(|e| StoreError::Transient(format!("fetch_by_field query: {e}")))?
            .filter_map(|r| r.ok());

        let mut records = Vec::new();
        for (key, body) in rows {
            records.push(Record {
                fields: parse_body(collection, &key, &body)?,
                key,
            });
        }
        Ok(records)
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Transient(format!("get query: {e}")))?;

        match body {
            Some(body) => Ok(Some(Record::new(key, parse_body(collection, key, &body)?))),
            None => Ok(None),
        }
    }

    async fn create(&self, collection: Collection, fields: Value) -> Result<Record, StoreError> {
        let key = generated_key(collection);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (collection, record_key, body) VALUES (?1, ?2, ?3)",
            params![collection.name(), key, fields.to_string()],
        )
        .map_err(|e| StoreError::Transient(format!("create insert: {e}")))?;
        Ok(Record::new(key, fields))
    }

    async fn put(&self, collection: Collection, key: &str, fields: Value) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (collection, record_key, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, record_key) DO UPDATE SET
                body = excluded.body,
                updated_at = datetime('now')",
            params![collection.name(), key, fields.to_string()],
        )
        .map_err(|e| StoreError::Transient(format!("put upsert: {e}")))?;
        Ok(())
    }

    async fn update(&self, collection: Collection, key: &str, patch: Value) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Transient(format!("update read: {e}")))?;

        let body = body.ok_or_else(|| StoreError::NotFound {
            collection: collection.name(),
            key: key.to_string(),
        })?;

        let mut fields = parse_body(collection, key, &body)?;
        if let (Some(dst), Some(src)) = (fields.as_object_mut(), patch.as_object()) {
            for (k, v) in src {
                if v.is_null() {
                    dst.remove(k);
                } else {
                    dst.insert(k.clone(), v.clone());
                }
            }
        }

        conn.execute(
            "UPDATE records SET body = ?3, updated_at = datetime('now')
             WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key, fields.to_string()],
        )
        .map_err(|e| StoreError::Transient(format!("update write: {e}")))?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )
        .map_err(|e| StoreError::Transient(format!("delete: {e}")))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(
                Collection::Orders,
                "o1",
                json!({ "email": "p@x.com", "points": 9 }),
            )
            .await
            .unwrap();
        let rec = store.get(Collection::Orders, "o1").await.unwrap().unwrap();
        assert_eq!(rec.fields["points"], 9);
        assert!(store.get(Collection::Orders, "o2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_by_field_uses_json_equality() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Collection::Orders, "a", json!({ "email": "p@x.com" }))
            .await
            .unwrap();
        store
            .put(Collection::Orders, "b", json!({ "email": "c@x.com" }))
            .await
            .unwrap();
        store
            .put(Collection::Orders, "c", json!({ "items": "no email here" }))
            .await
            .unwrap();

        let hits = store
            .fetch_by_field(Collection::Orders, "email", "p@x.com")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Collection::Grants, "k", json!({ "pointsAdded": 1 }))
            .await
            .unwrap();
        assert!(store.fetch_all(Collection::Redemptions).await.unwrap().is_empty());
        assert_eq!(store.fetch_all(Collection::Grants).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_merges_and_null_removes() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(
                Collection::Orders,
                "o1",
                json!({ "points": 3, "paymentSentAt": 12345i64 }),
            )
            .await
            .unwrap();
        store
            .update(
                Collection::Orders,
                "o1",
                json!({ "points": 5, "paymentSentAt": Value::Null }),
            )
            .await
            .unwrap();

        let rec = store.get(Collection::Orders, "o1").await.unwrap().unwrap();
        assert_eq!(rec.fields["points"], 5);
        assert!(rec.fields.get("paymentSentAt").is_none());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .update(Collection::Orders, "ghost", json!({ "points": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_overwrites_an_existing_body() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Collection::Orders, "o1", json!({ "points": 1, "ready": true }))
            .await
            .unwrap();
        store
            .put(Collection::Orders, "o1", json!({ "points": 2 }))
            .await
            .unwrap();

        let rec = store.get(Collection::Orders, "o1").await.unwrap().unwrap();
        assert_eq!(rec.fields["points"], 2);
        assert!(rec.fields.get("ready").is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_keys_stay_sorted() {
        let store = SqliteStore::in_memory().unwrap();
        for key in ["b", "a", "c"] {
            store
                .put(Collection::Users, key, json!({ "name": key }))
                .await
                .unwrap();
        }
        store.delete(Collection::Users, "b").await.unwrap();
        store.delete(Collection::Users, "b").await.unwrap();

        let all = store.fetch_all(Collection::Users).await.unwrap();
        let keys: Vec<_> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn generated_create_keys_are_unique() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store
            .create(Collection::Users, json!({ "name": "a" }))
            .await
            .unwrap();
        let b = store
            .create(Collection::Users, json!({ "name": "b" }))
            .await
            .unwrap();
        assert_ne!(a.key, b.key);
        assert!(a.key.starts_with("usr-"));
    }
}
