//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::asset::CachedAsset;

/// Trait for cache store backends.
///
/// A backend holds any number of named stores, each one generation of cached
/// assets keyed by absolute URL. Stores are populated whole (`put_all`) and
/// deleted whole (`delete_store`); there is no per-entry eviction.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Replace the named store's contents with the given snapshots, atomically.
  /// A failure leaves the store as it was.
  fn put_all(&self, name: &str, assets: &[CachedAsset]) -> Result<()>;

  /// Look up a snapshot by URL in the named store.
  fn get(&self, name: &str, url: &str) -> Result<Option<CachedAsset>>;

  /// Number of snapshots in the named store, or None if the store is absent.
  fn entry_count(&self, name: &str) -> Result<Option<usize>>;

  /// Names of all stores currently held.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a whole store. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;
}

/// SQLite-backed cache storage. This is the production backend: stores
/// survive across process runs until a newer generation purges them.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per store generation, so empty stores are still enumerable
CREATE TABLE IF NOT EXISTS cache_stores (
    store_name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Asset snapshots, keyed by (generation, absolute URL)
CREATE TABLE IF NOT EXISTS asset_cache (
    store_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (store_name, url),
    FOREIGN KEY (store_name) REFERENCES cache_stores(store_name) ON DELETE CASCADE
);
"#;

impl SqliteStorage {
  /// Open (creating if needed) the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (creating if needed) the cache database at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (store_name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    Ok(())
  }

  fn put_all(&self, name: &str, assets: &[CachedAsset]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = (|| -> Result<()> {
      conn
        .execute(
          "INSERT OR IGNORE INTO cache_stores (store_name, created_at) VALUES (?, ?)",
          params![name, Utc::now().to_rfc3339()],
        )
        .map_err(|e| eyre!("Failed to register cache store: {}", e))?;

      // Whole-store replacement: the manifest defines the store's exact contents
      conn
        .execute("DELETE FROM asset_cache WHERE store_name = ?", params![name])
        .map_err(|e| eyre!("Failed to clear cache store: {}", e))?;

      for asset in assets {
        conn
          .execute(
            "INSERT OR REPLACE INTO asset_cache (store_name, url, status, content_type, body, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
              name,
              asset.url,
              asset.status,
              asset.content_type,
              asset.body,
              asset.fetched_at.to_rfc3339()
            ],
          )
          .map_err(|e| eyre!("Failed to store asset {}: {}", asset.url, e))?;
      }

      Ok(())
    })();

    match result {
      Ok(()) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        // Leave the store untouched on any failure
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  fn get(&self, name: &str, url: &str) -> Result<Option<CachedAsset>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body, fetched_at FROM asset_cache
         WHERE store_name = ? AND url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Option<String>, Vec<u8>, String)> = stmt
      .query_row(params![name, url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, content_type, body, fetched_at_str)) => {
        let fetched_at = parse_datetime(&fetched_at_str)?;
        Ok(Some(CachedAsset {
          url: url.to_string(),
          status,
          content_type,
          body,
          fetched_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn entry_count(&self, name: &str) -> Result<Option<usize>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let exists: bool = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE store_name = ?",
        params![name],
        |_| Ok(true),
      )
      .unwrap_or(false);

    if !exists {
      return Ok(None);
    }

    let count: usize = conn
      .query_row(
        "SELECT COUNT(*) FROM asset_cache WHERE store_name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;

    Ok(Some(count))
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT store_name FROM cache_stores ORDER BY store_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM asset_cache WHERE store_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache entries for {}: {}", name, e))?;

    let deleted = conn
      .execute("DELETE FROM cache_stores WHERE store_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    Ok(deleted > 0)
  }
}

/// In-memory cache storage, used as a test double for the SQLite backend.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<HashMap<String, BTreeMap<String, CachedAsset>>>,
}

#[cfg(test)]
impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[cfg(test)]
impl CacheStorage for MemoryStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(name.to_string()).or_default();
    Ok(())
  }

  fn put_all(&self, name: &str, assets: &[CachedAsset]) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let entries = assets.iter().map(|a| (a.url.clone(), a.clone())).collect();
    stores.insert(name.to_string(), entries);
    Ok(())
  }

  fn get(&self, name: &str, url: &str) -> Result<Option<CachedAsset>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(name).and_then(|s| s.get(url)).cloned())
  }

  fn entry_count(&self, name: &str) -> Result<Option<usize>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(name).map(|s| s.len()))
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(name).is_some())
  }
}

/// Parse an RFC 3339 datetime string back out of storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
