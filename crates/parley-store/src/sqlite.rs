use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{ListPush, TtlStore};

/// Create the key-value tables.
///
/// Plain values and lists live in separate tables, so a key used as a list
/// is invisible to `get` and the other plain-value operations.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_entries (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            expires_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS kv_lists (
            seq        INTEGER PRIMARY KEY AUTOINCREMENT,
            key        TEXT NOT NULL,
            item       TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_kv_lists_key ON kv_lists(key, seq);",
    )?;
    Ok(())
}

/// [`TtlStore`] on a SQLite file, shared by every process that opens it.
///
/// Expiry timestamps are unix milliseconds. Multi-statement operations run
/// in `BEGIN IMMEDIATE` transactions so concurrent writers serialise on the
/// database lock.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
        Self::new(conn)
    }

    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Delete every expired row. Returns how many were dropped.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = now_ms();
        let db = self.conn()?;
        let entries = db.execute(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [now],
        )?;
        let items = db.execute("DELETE FROM kv_lists WHERE expires_at <= ?1", [now])?;
        if entries + items > 0 {
            debug!(entries, items, "sqlite store sweep");
        }
        Ok(entries + items)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".into()))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(ttl.as_millis() as i64)
}

#[async_trait]
impl TtlStore for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let value = db
            .query_row(
                "SELECT value FROM kv_entries
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                rusqlite::params![key, now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| expiry(now_ms(), t));
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = now_ms();
        let db = self.conn()?;
        let live = db.execute(
            "DELETE FROM kv_entries
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            rusqlite::params![key, now],
        )?;
        db.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
        Ok(live > 0)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let db = self.conn()?;
        // An expired row counts as absent: the conflict branch overwrites it.
        let changed = db.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
                SET value = excluded.value, expires_at = excluded.expires_at
                WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ?4",
            rusqlite::params![key, value, expiry(now, ttl), now],
        )?;
        Ok(changed == 1)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM kv_entries
             WHERE key = ?1 AND value = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
            rusqlite::params![key, expected, now_ms()],
        )?;
        Ok(removed > 0)
    }

    async fn list_push(&self, key: &str, item: &str, ttl: Duration) -> Result<ListPush> {
        let now = now_ms();
        let expires_at = expiry(now, ttl);
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM kv_lists WHERE key = ?1 AND expires_at <= ?2",
            rusqlite::params![key, now],
        )?;
        tx.execute(
            "INSERT INTO kv_lists (key, item, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, item, expires_at],
        )?;
        tx.execute(
            "UPDATE kv_lists SET expires_at = ?2 WHERE key = ?1",
            rusqlite::params![key, expires_at],
        )?;
        let len: i64 = tx.query_row(
            "SELECT COUNT(*) FROM kv_lists WHERE key = ?1",
            [key],
            |row| row.get(0),
        )?;
        let head: String = tx.query_row(
            "SELECT item FROM kv_lists WHERE key = ?1 ORDER BY seq LIMIT 1",
            [key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(ListPush {
            len: len as usize,
            head,
        })
    }

    async fn list_touch(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let db = self.conn()?;
        let touched = db.execute(
            "UPDATE kv_lists SET expires_at = ?3 WHERE key = ?1 AND expires_at > ?2",
            rusqlite::params![key, now, expiry(now, ttl)],
        )?;
        Ok(touched > 0)
    }

    async fn list_take(&self, key: &str) -> Result<Vec<String>> {
        let now = now_ms();
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let items = {
            let mut stmt = tx.prepare(
                "SELECT item FROM kv_lists WHERE key = ?1 AND expires_at > ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(rusqlite::params![key, now], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()?
        };
        tx.execute("DELETE FROM kv_lists WHERE key = ?1", [key])?;
        tx.commit()?;
        Ok(items)
    }
}
