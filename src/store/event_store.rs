//! Event store with async `SQLite` operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tokio::sync::Mutex;

use super::error::StoreError;
use super::schema::{SCHEMA, SCHEMA_VERSION};
use crate::watcher::{EventSink, GameLogEvent, TIMESTAMP_FORMAT};

/// Returns the default path for the event database.
///
/// This is `~/.local/share/gamelog-watcher/gamelog.db` on Linux.
#[must_use]
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gamelog-watcher")
        .join("gamelog.db")
}

/// An event read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub source_file: String,
    pub timestamp: DateTime<Utc>,
    pub tag: String,
    pub fields: Vec<String>,
}

impl StoredEvent {
    /// The same positional row [`GameLogEvent::to_row`] produces.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.source_file.clone(),
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.tag.clone(),
        ];
        row.extend(self.fields.iter().cloned());
        row
    }
}

/// Durable sink for drained events.
///
/// Uses `SQLite` with blocking work moved to `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

impl EventStore {
    /// Open the store at `path`, creating parent directories and schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot be applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let path_clone = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path_clone).map_err(|source| StoreError::DatabaseOpen {
                path: path_clone,
                source,
            })?;
            init(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        tracing::debug!(path = %path.display(), "Event store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or the schema cannot be applied.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, StoreError> {
            let conn = Connection::open_in_memory()?;
            init(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Returns the path to the database, if opened from a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert `events` in one transaction, returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is written in that case.
    pub async fn insert_events(&self, events: &[GameLogEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let rows = events
            .iter()
            .map(|event| -> Result<_, StoreError> {
                Ok((
                    event.source_file.clone(),
                    event.timestamp,
                    event.kind.tag(),
                    serde_json::to_string(&event.kind.fields())?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO events (source_file, timestamp, tag, fields) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (source_file, timestamp, tag, fields) in &rows {
                    stmt.execute(params![source_file, timestamp, tag, fields])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }

    /// Move up to `limit` backlog events from `sink` into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails. The batch is then put back at
    /// the front of the sink, so no event is lost and order is kept.
    pub async fn flush_sink(&self, sink: &EventSink, limit: usize) -> Result<usize, StoreError> {
        let batch = sink.drain(limit);
        match self.insert_events(&batch).await {
            Ok(written) => Ok(written),
            Err(e) => {
                sink.requeue(batch);
                Err(e)
            }
        }
    }

    /// Timestamp of the newest stored event; the watermark to resume from.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<DateTime<Utc>>, StoreError> {
            let conn = conn.blocking_lock();
            let latest = conn.query_row("SELECT MAX(timestamp) FROM events", [], |row| {
                row.get::<_, Option<DateTime<Utc>>>(0)
            })?;
            Ok(latest)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }

    /// Most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails, or
    /// [`StoreError::CorruptEvent`] if a returned row does not decode.
    pub async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredEvent>, StoreError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, source_file, timestamp, tag, fields
                 FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    let id: i64 = row.get(0)?;
                    let source_file: String = row.get(1)?;
                    let timestamp = row.get::<_, DateTime<Utc>>(2);
                    let tag: String = row.get(3)?;
                    let fields: String = row.get(4)?;
                    Ok((id, source_file, timestamp, tag, fields))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, source_file, timestamp, tag, fields)| -> Result<StoredEvent, StoreError> {
                    let corrupt = |column, source: Box<dyn std::error::Error + Send + Sync>| {
                        StoreError::CorruptEvent { id, column, source }
                    };
                    Ok(StoredEvent {
                        id,
                        source_file,
                        timestamp: timestamp.map_err(|e| corrupt("timestamp", e.into()))?,
                        tag,
                        fields: serde_json::from_str(&fields)
                            .map_err(|e| corrupt("fields", e.into()))?,
                    })
                })
                .collect()
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }

    /// Count stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let conn = conn.blocking_lock();
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count.unsigned_abs())
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }
}
