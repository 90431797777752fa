//! Partition store trait and SQLite implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::types::StoredResponse;

/// Durable (request key -> stored response) pairs grouped into named partitions.
///
/// Partitions are created implicitly by the first write into them and only
/// ever disappear as a whole.
pub trait PartitionStore: Send + Sync {
  /// Names of every partition currently holding data, sorted.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Look up a key in one partition.
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Look up a key in any partition, trying `preferred` first and then the
  /// others in name order. Returns the partition the hit came from.
  fn find(&self, key: &str, preferred: &str) -> Result<Option<(String, StoredResponse)>>;

  /// Store a single entry; last write wins.
  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()>;

  /// Write a complete install: every entry plus the completion marker for
  /// `partition`, atomically. Either all of it lands or none of it does.
  fn install(&self, partition: &str, entries: &[(String, StoredResponse)]) -> Result<()>;

  /// Whether a complete install of `partition` was recorded. Entries written
  /// one at a time never count.
  fn installed(&self, partition: &str) -> Result<bool>;

  /// Delete a partition, every entry in it and its install marker. Returns
  /// whether it existed.
  fn delete_partition(&self, partition: &str) -> Result<bool>;
}

/// SQLite-based partition store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the given path.
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

  /// Store that lives only as long as the process.
  #[cfg(test)]
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

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One stored response per (partition, request key)
CREATE TABLE IF NOT EXISTS entries (
    partition_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(request_key);

-- Present only for partitions whose install committed in full
CREATE TABLE IF NOT EXISTS installs (
    partition_name TEXT PRIMARY KEY,
    completed_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn insert_entry(conn: &Connection, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
  let stored_at = response.stored_at.format(DATETIME_FORMAT).to_string();

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (partition_name, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![partition, key, response.status, headers, response.body.as_ref(), stored_at],
    )
    .map_err(|e| eyre!("Failed to store entry {} in {}: {}", key, partition, e))?;

  Ok(())
}

/// Raw columns of an entry row, decoded outside the rusqlite closure.
type EntryRow = (u16, String, Vec<u8>, String);

fn read_entry_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(offset)?,
    row.get(offset + 1)?,
    row.get(offset + 2)?,
    row.get(offset + 3)?,
  ))
}

fn decode_entry((status, headers, body, stored_at): EntryRow) -> Result<StoredResponse> {
  let headers =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  Ok(StoredResponse {
    status,
    headers,
    body: Bytes::from(body),
    stored_at: parse_datetime(&stored_at)?,
  })
}

impl PartitionStore for SqliteStore {
  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE partition_name = ? AND request_key = ?",
        params![partition, key],
        |row| read_entry_row(row, 0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))?;

    row.map(decode_entry).transpose()
  }

  fn find(&self, key: &str, preferred: &str) -> Result<Option<(String, StoredResponse)>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT partition_name, status, headers, body, stored_at FROM entries
         WHERE request_key = ?1
         ORDER BY (partition_name = ?2) DESC, partition_name
         LIMIT 1",
        params![key, preferred],
        |row| Ok((row.get::<_, String>(0)?, read_entry_row(row, 1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((partition, entry)) => Ok(Some((partition, decode_entry(entry)?))),
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_entry(&tx, partition, key, response)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn install(&self, partition: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    let mut conn = self.lock()?;

    // Dropping the transaction on an early return rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;
    for (key, response) in entries {
      insert_entry(&tx, partition, key, response)?;
    }
    tx.execute(
      "INSERT OR REPLACE INTO installs (partition_name, completed_at) VALUES (?, datetime('now'))",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to mark {} installed: {}", partition, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn installed(&self, partition: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found = conn
      .query_row(
        "SELECT 1 FROM installs WHERE partition_name = ?",
        params![partition],
        |_| Ok(()),
      )
      .optional()
      .map_err(|e| eyre!("Failed to check install of {}: {}", partition, e))?;

    Ok(found.is_some())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute("DELETE FROM entries WHERE partition_name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;
    tx.execute("DELETE FROM installs WHERE partition_name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete install marker of {}: {}", partition, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
