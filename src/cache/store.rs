//! Store registry trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A value read back from a store, with the time it was written.
#[derive(Debug, Clone)]
pub struct Stored<T> {
  pub value: T,
  pub cached_at: DateTime<Utc>,
}

/// Named key→value stores owned by the cache manager.
///
/// Stores exist while they hold at least one entry; deletion is whole-store.
/// Writes are last-write-wins per key.
pub trait StoreRegistry: Send + Sync {
  /// Write a value under (store, key), replacing any previous entry.
  fn put<T: Serialize>(&self, store: &str, key: &str, value: &T) -> Result<()>;

  /// Read a value back, or None on a miss.
  fn get<T: DeserializeOwned>(&self, store: &str, key: &str) -> Result<Option<Stored<T>>>;

  /// Remove a single entry. Removing a missing entry is not an error.
  fn remove(&self, store: &str, key: &str) -> Result<()>;

  /// All keys currently present in a store.
  fn keys(&self, store: &str) -> Result<Vec<String>>;

  /// Names of all non-empty stores.
  fn list_stores(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it.
  fn delete_store(&self, store: &str) -> Result<()>;

  /// Delete every store.
  fn clear_all(&self) -> Result<()> {
    for store in self.list_stores()? {
      self.delete_store(&store)?;
    }
    Ok(())
  }
}

/// Schema for the store table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_entries (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key)
);

CREATE INDEX IF NOT EXISTS idx_store_entries_store ON store_entries(store);
"#;

/// SQLite-backed store registry.
pub struct SqliteStores {
  conn: Mutex<Connection>,
}

impl SqliteStores {
  /// Open or create the registry at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let stores = Self {
      conn: Mutex::new(conn),
    };
    stores.run_migrations()?;
    Ok(stores)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("stores.db"))
  }

  /// Run database migrations for the store table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

impl StoreRegistry for SqliteStores {
  fn put<T: Serialize>(&self, store: &str, key: &str, value: &T) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO store_entries (store, key, value, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![store, key, data],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    Ok(())
  }

  fn get<T: DeserializeOwned>(&self, store: &str, key: &str) -> Result<Option<Stored<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT value, cached_at FROM store_entries WHERE store = ? AND key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![store, key], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    match row {
      Some((data, cached_at_str)) => {
        let value: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entry: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(Stored { value, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, store: &str, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM store_entries WHERE store = ? AND key = ?",
        params![store, key],
      )
      .map_err(|e| eyre!("Failed to remove entry: {}", e))?;

    Ok(())
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM store_entries WHERE store = ? ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT store FROM store_entries ORDER BY store")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let stores = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query store names: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(stores)
  }

  fn delete_store(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM store_entries WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store: {}", e))?;

    Ok(())
  }
}

/// In-memory store registry for tests and ephemeral runs.
pub struct MemoryStores {
  stores: Mutex<HashMap<String, HashMap<String, (Vec<u8>, DateTime<Utc>)>>>,
}

impl MemoryStores {
  pub fn new() -> Self {
    Self {
      stores: Mutex::new(HashMap::new()),
    }
  }
}

impl Default for MemoryStores {
  fn default() -> Self {
    Self::new()
  }
}

impl StoreRegistry for MemoryStores {
  fn put<T: Serialize>(&self, store: &str, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    stores
      .entry(store.to_string())
      .or_default()
      .insert(key.to_string(), (data, Utc::now()));

    Ok(())
  }

  fn get<T: DeserializeOwned>(&self, store: &str, key: &str) -> Result<Option<Stored<T>>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    match stores.get(store).and_then(|entries| entries.get(key)) {
      Some((data, cached_at)) => {
        let value: T = serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize entry: {}", e))?;
        Ok(Some(Stored {
          value,
          cached_at: *cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, store: &str, key: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(entries) = stores.get_mut(store) {
      entries.remove(key);
      if entries.is_empty() {
        stores.remove(store);
      }
    }

    Ok(())
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut keys: Vec<String> = stores
      .get(store)
      .map(|entries| entries.keys().cloned().collect())
      .unwrap_or_default();
    keys.sort();

    Ok(keys)
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();

    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    stores.remove(store);

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
