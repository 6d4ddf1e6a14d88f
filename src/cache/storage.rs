//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::types::{CachedEntry, RequestKey, StoredResponse};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores. Writing to a store that does
/// not exist yet creates it.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the store if it is absent.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Names of all existing stores, sorted.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Look up an exact match in a store.
  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite a single entry.
  fn put_entry(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Insert or overwrite several entries; either all are written or none.
  fn put_entries(&self, store: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<()>;

  /// Request identities cached in a store, sorted.
  fn entry_keys(&self, store: &str) -> Result<Vec<String>>;

  /// Record the lifecycle state of the version owning a store, creating the
  /// store if needed.
  fn set_store_state(&self, name: &str, state: &str) -> Result<()>;

  /// Last recorded lifecycle state, if the store exists and has one.
  fn store_state(&self, name: &str) -> Result<Option<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (creating if needed) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named store (e.g. "rhh-cache-v13")
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    state TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses, keyed by the hash of the request identity
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    identity TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_store ON entries(store_name);
"#;

const INSERT_STORE: &str = "INSERT OR IGNORE INTO stores (name) VALUES (?)";

const UPSERT_STORE_STATE: &str = "INSERT INTO stores (name, state) VALUES (?1, ?2)
   ON CONFLICT(name) DO UPDATE SET state = excluded.state";

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO entries (store_name, key_hash, identity, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn upsert_entry(
  conn: &Connection,
  store: &str,
  key: &RequestKey,
  response: &StoredResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        store,
        key.cache_hash(),
        key.identity(),
        response.url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute(INSERT_STORE, params![name])
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE store_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of store {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM entries
         WHERE store_name = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![store, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(CachedEntry {
          response: StoredResponse {
            url,
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_entry(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
    upsert_entry(&conn, store, key, response)
  }

  fn put_entries(&self, store: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    for (key, response) in entries {
      // Dropping the transaction on error rolls everything back
      upsert_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT identity FROM entries WHERE store_name = ? ORDER BY identity")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry identity: {}", e))?;

    Ok(keys)
  }

  fn set_store_state(&self, name: &str, state: &str) -> Result<()> {
    self
      .conn()?
      .execute(UPSERT_STORE_STATE, params![name, state])
      .map_err(|e| eyre!("Failed to record state of store {}: {}", name, e))?;
    Ok(())
  }

  fn store_state(&self, name: &str) -> Result<Option<String>> {
    let state: Option<Option<String>> = self
      .conn()?
      .query_row(
        "SELECT state FROM stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read state of store {}: {}", name, e))?;

    Ok(state.flatten())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://example.com/").unwrap().join(path).unwrap();
    RequestKey::new("GET", &url)
  }

  fn response(body: &str) -> StoredResponse {
    StoredResponse {
      url: "https://example.com/".to_string(),
      status: 200,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_then_get_returns_identical_response() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let stored = response("hello");
    storage.put_entry("v1", &key("index.html"), &stored).unwrap();

    let entry = storage.get_entry("v1", &key("index.html")).unwrap().unwrap();
    assert_eq!(entry.response, stored);
  }

  #[test]
  fn test_entries_are_scoped_by_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_entry("v1", &key("a.mp3"), &response("a")).unwrap();

    assert!(storage.get_entry("v2", &key("a.mp3")).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_last_write_wins() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_entry("v1", &key("a"), &response("old")).unwrap();
    storage.put_entry("v1", &key("a"), &response("new")).unwrap();

    let entry = storage.get_entry("v1", &key("a")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
    assert_eq!(storage.entry_keys("v1").unwrap().len(), 1);
  }

  #[test]
  fn test_delete_store_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_entry("v1", &key("a"), &response("a")).unwrap();
    storage.open_store("v2").unwrap();

    assert!(storage.delete_store("v1").unwrap());
    assert!(!storage.delete_store("v1").unwrap());
    assert_eq!(storage.store_names().unwrap(), vec!["v2".to_string()]);
    assert!(storage.get_entry("v1", &key("a")).unwrap().is_none());
  }

  #[test]
  fn test_put_entries_writes_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![(key("a"), response("a")), (key("b"), response("b"))];
    storage.put_entries("v1", &entries).unwrap();

    assert_eq!(
      storage.entry_keys("v1").unwrap(),
      vec![
        "GET https://example.com/a".to_string(),
        "GET https://example.com/b".to_string()
      ]
    );
  }

  #[test]
  fn test_open_store_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("v1").unwrap();
    storage.open_store("v1").unwrap();
    assert_eq!(storage.store_names().unwrap(), vec!["v1".to_string()]);
  }

  #[test]
  fn test_store_state_recorded_and_dropped_with_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("v1").unwrap();
    assert_eq!(storage.store_state("v1").unwrap(), None);
    assert_eq!(storage.store_state("v2").unwrap(), None);

    storage.set_store_state("v1", "installed").unwrap();
    storage.set_store_state("v1", "activated").unwrap();
    storage.set_store_state("v2", "installed").unwrap();
    assert_eq!(storage.store_state("v1").unwrap().as_deref(), Some("activated"));
    assert_eq!(
      storage.store_names().unwrap(),
      vec!["v1".to_string(), "v2".to_string()]
    );

    storage.delete_store("v1").unwrap();
    assert_eq!(storage.store_state("v1").unwrap(), None);
  }

  #[test]
  fn test_file_database_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put_entry("v1", &key("a"), &response("persisted")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let entry = storage.get_entry("v1", &key("a")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"persisted");
  }
}
