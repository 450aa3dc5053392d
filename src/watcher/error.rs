//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while watching the log directory.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Watermark supplied at activation is not a valid timestamp.
    #[error("Invalid watermark {value:?}: {source}")]
    InvalidWatermark {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Log file disappeared between the scan and the read.
    #[error("Log file deleted: {0}")]
    FileDeleted(PathBuf),

    /// Permission denied accessing a log file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// File name pattern could not be compiled.
    #[error("Invalid file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Map an open/read failure on `path` to the most specific variant.
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileDeleted(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}
