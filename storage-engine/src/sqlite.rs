use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use recall::domain::{BackendCounts, EntryRecord};
use recall::ports::ContextBackend;
use rusqlite::{Connection, OptionalExtension, params};
use shared::{BackendKind, Error, Result};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    payload    BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (namespace, key)
);
CREATE INDEX IF NOT EXISTS idx_entries_expires_at
    ON entries (expires_at) WHERE expires_at IS NOT NULL;
";

/// Embedded sql backend. One bundled sqlite database holds every
/// namespace; timestamps are stored as unix milliseconds so expiry
/// predicates run in sql and the partial index keeps purges cheap.
///
/// The connection is not thread-safe, so all statements run on the
/// blocking pool behind one mutex.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Unavailable(format!(
                        "Failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path).map_err(|e| {
                Error::Unavailable(format!(
                    "Failed to open database '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
                Error::Unavailable(format!("Failed to enable WAL journaling: {}", e))
            })?;
            conn.execute_batch(SCHEMA).map_err(|e| {
                Error::Unavailable(format!("Failed to apply database schema: {}", e))
            })?;
            debug!("sqlite backend ready at {}", path.display());
            Ok(conn)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("Failed to open database: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs one statement batch on the blocking pool under the connection
    /// lock.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Unavailable("database connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("Failed to run database task: {}", e)))?
    }
}

fn record_from_row(
    payload: Vec<u8>,
    created_ms: i64,
    expires_ms: Option<i64>,
) -> Result<EntryRecord> {
    let created_at = millis_to_datetime(created_ms)?;
    let expires_at = expires_ms.map(millis_to_datetime).transpose()?;
    Ok(EntryRecord {
        payload: Bytes::from(payload),
        created_at,
        expires_at,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Serialization(format!("Stored timestamp {} is out of range", ms)))
}

#[async_trait]
impl ContextBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn put(&self, namespace: &str, key: &str, record: EntryRecord) -> Result<()> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries (namespace, key, payload, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    namespace,
                    key,
                    record.payload.as_ref(),
                    record.created_at.timestamp_millis(),
                    record.expires_at.map(|at| at.timestamp_millis()),
                ],
            )
            .map_err(|e| Error::Unavailable(format!("Failed to write entry: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT payload, created_at, expires_at FROM entries
                     WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| Error::Unavailable(format!("Failed to read entry: {}", e)))?;

            row.map(|(payload, created_ms, expires_ms)| {
                record_from_row(payload, created_ms, expires_ms)
            })
            .transpose()
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )
                .map_err(|e| Error::Unavailable(format!("Failed to delete entry: {}", e)))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_keys(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let namespace = namespace.to_string();
        let now_ms = now.timestamp_millis();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key FROM entries
                     WHERE namespace = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                )
                .map_err(|e| Error::Unavailable(format!("Failed to list keys: {}", e)))?;
            let keys = stmt
                .query_map(params![namespace, now_ms], |row| row.get::<_, String>(0))
                .and_then(Iterator::collect)
                .map_err(|e| Error::Unavailable(format!("Failed to list keys: {}", e)))?;
            Ok(keys)
        })
        .await
    }

    async fn snapshot(&self, namespace: &str) -> Result<Vec<(String, EntryRecord)>> {
        let namespace = namespace.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key, payload, created_at, expires_at FROM entries
                     WHERE namespace = ?1",
                )
                .map_err(|e| Error::Unavailable(format!("Failed to read namespace: {}", e)))?;
            let rows: Vec<(String, Vec<u8>, i64, Option<i64>)> = stmt
                .query_map(params![namespace], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .and_then(Iterator::collect)
                .map_err(|e| Error::Unavailable(format!("Failed to read namespace: {}", e)))?;

            rows.into_iter()
                .map(|(key, payload, created_ms, expires_ms)| {
                    Ok((key, record_from_row(payload, created_ms, expires_ms)?))
                })
                .collect()
        })
        .await
    }

    async fn clear(&self, namespace: &str) -> Result<u64> {
        let namespace = namespace.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM entries WHERE namespace = ?1", params![namespace])
                .map_err(|e| Error::Unavailable(format!("Failed to clear namespace: {}", e)))?;
            Ok(removed as u64)
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let now_ms = now.timestamp_millis();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now_ms],
                )
                .map_err(|e| Error::Unavailable(format!("Failed to purge expired entries: {}", e)))?;
            Ok(removed as u64)
        })
        .await
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<BackendCounts> {
        let now_ms = now.timestamp_millis();
        self.with_conn(move |conn| {
            let entries: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM entries
                     WHERE expires_at IS NULL OR expires_at > ?1",
                    params![now_ms],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Unavailable(format!("Failed to count entries: {}", e)))?;
            let namespaces: i64 = conn
                .query_row(
                    "SELECT COUNT(DISTINCT namespace) FROM entries
                     WHERE expires_at IS NULL OR expires_at > ?1",
                    params![now_ms],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Unavailable(format!("Failed to count namespaces: {}", e)))?;
            Ok(BackendCounts {
                entries: entries as u64,
                namespaces: namespaces as u64,
            })
        })
        .await
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish()
    }
}
