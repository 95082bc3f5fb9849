//! SQLite implementation of the KV interface.
//!
//! The primary persistent backend. Uses rusqlite with bundled SQLite,
//! one flat `kv` table, and a mutex-guarded connection.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Result, StoreError};
use crate::traits::KvStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
)";

/// SQLite-backed KV store.
///
/// Thread-safe via an internal mutex around the single connection.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open (and create if needed) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the locked connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                Some(format!("mutex poisoned: {}", e)),
            ))
        })?;
        f(&conn)
    }

    /// Run a closure that needs mutable access (transactions).
    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                Some(format!("mutex poisoned: {}", e)),
            ))
        })?;
        f(&mut conn)
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
        })
    }

    async fn head(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_some() {
                Ok(())
            } else {
                Err(StoreError::NotFound(key.to_string()))
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            let affected = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            if affected == 0 {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Ok(())
        })
    }

    async fn atomic_put(&self, key: &str, prev: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current: Option<Vec<u8>> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            if current.as_deref() != prev {
                return Err(StoreError::CasConflict(key.to_string()));
            }
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let pattern = format!("{}%", escape_like(prefix));
            let mut stmt = conn.prepare(
                "SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key ASC",
            )?;
            let keys = stmt
                .query_map(params![pattern], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = SqliteKvStore::open_memory().unwrap();
        store.put("a", b"1").await.unwrap();
        store.put("a", b"2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), b"2");
        store.head("a").await.unwrap();

        store.delete("a").await.unwrap();
        assert!(matches!(store.get("a").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.head("a").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_atomic_put_semantics() {
        let store = SqliteKvStore::open_memory().unwrap();

        store.atomic_put("k", None, b"v1").await.unwrap();
        assert!(matches!(
            store.atomic_put("k", None, b"v2").await,
            Err(StoreError::CasConflict(_))
        ));

        store.atomic_put("k", Some(b"v1"), b"v2").await.unwrap();
        assert!(matches!(
            store.atomic_put("k", Some(b"v1"), b"v3").await,
            Err(StoreError::CasConflict(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_list_sorted_and_escaped() {
        let store = SqliteKvStore::open_memory().unwrap();
        store.put("p:2", b"").await.unwrap();
        store.put("p:1", b"").await.unwrap();
        store.put("q:1", b"").await.unwrap();
        // Would match "p:1" under an unescaped LIKE.
        store.put("p_1", b"").await.unwrap();

        assert_eq!(store.list("p:").await.unwrap(), vec!["p:1", "p:2"]);
        assert_eq!(store.list("p_").await.unwrap(), vec!["p_1"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.put("durable", b"yes").await.unwrap();
        }

        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(store.get("durable").await.unwrap(), b"yes");
    }
}
