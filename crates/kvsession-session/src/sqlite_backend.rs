use crate::backend::KeyValueBackend;
use async_trait::async_trait;
use chrono::Utc;
use kvsession_core::{KvSessionError, KvSessionResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLite backend: one table per bucket, expiry stored as unix milliseconds.
///
/// rusqlite is blocking, so every call runs on the blocking thread pool.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

fn sql_err(e: rusqlite::Error) -> KvSessionError {
    KvSessionError::Backend(format!("sqlite: {e}"))
}

fn table_name(bucket: &str) -> KvSessionResult<String> {
    if bucket.is_empty() || !bucket.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(KvSessionError::Backend(format!(
            "invalid bucket name '{bucket}'"
        )));
    }
    Ok(format!("kv_{bucket}"))
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> KvSessionResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> KvSessionResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> KvSessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| KvSessionError::Backend("sqlite connection poisoned".into()))?;
            f(&guard).map_err(sql_err)
        })
        .await
        .map_err(|e| KvSessionError::Backend(format!("sqlite task failed: {e}")))?
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn ensure_bucket(&self, bucket: &str) -> KvSessionResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER
            )",
            table_name(bucket)?
        );
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    async fn get(&self, bucket: &str, key: &str) -> KvSessionResult<Option<Vec<u8>>> {
        let table = table_name(bucket)?;
        let key = key.to_string();
        let now = Utc::now().timestamp_millis();
        self.run(move |conn| {
            let row: Option<(Vec<u8>, Option<i64>)> = conn
                .query_row(
                    &format!("SELECT value, expires_at FROM {table} WHERE key = ?1"),
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((_, Some(expires_at))) if expires_at <= now => {
                    conn.execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![key])?;
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(value)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvSessionResult<()> {
        let table = table_name(bucket)?;
        let key = key.to_string();
        let expires_at = ttl.map(|ttl| {
            Utc::now()
                .timestamp_millis()
                .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
        });
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table} (key, value, expires_at) VALUES (?1, ?2, ?3)"
                ),
                params![key, value, expires_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> KvSessionResult<()> {
        let table = table_name(bucket)?;
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![key])
                .map(|_| ())
        })
        .await
    }
}
