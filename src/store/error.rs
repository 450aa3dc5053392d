//! Event store error types.

use std::path::PathBuf;

/// Errors that can occur during event store operations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Failed to open or create database.
    #[error("Failed to open database at {path}: {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Failed to execute SQL.
    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// Failed to encode event fields for storage.
    #[error("Event field encoding failed: {0}")]
    Fields(#[from] serde_json::Error),

    /// A stored event row holds a value that no longer decodes.
    #[error("Stored event {id} has a corrupt {column}: {source}")]
    CorruptEvent {
        id: i64,
        column: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Blocking task was cancelled.
    #[error("Blocking task cancelled")]
    TaskCancelled,

    /// Failed to create parent directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_open_display() {
        let err = StoreError::DatabaseOpen {
            path: PathBuf::from("/tmp/gamelog.db"),
            source: rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some("test".to_string()),
            ),
        };
        assert!(err.to_string().contains("Failed to open database"));
        assert!(err.to_string().contains("/tmp/gamelog.db"));
    }

    #[test]
    fn test_corrupt_event_display() {
        let source = serde_json::from_str::<Vec<String>>("{").unwrap_err();
        let err = StoreError::CorruptEvent {
            id: 42,
            column: "fields",
            source: source.into(),
        };
        assert!(err
            .to_string()
            .starts_with("Stored event 42 has a corrupt fields: "));
    }

    #[test]
    fn test_task_cancelled_display() {
        assert_eq!(StoreError::TaskCancelled.to_string(), "Blocking task cancelled");
    }
}
