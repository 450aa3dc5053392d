//! Log file discovery.
//!
//! Lists the log files in the watched directory that match the configured
//! name pattern, oldest first.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobMatcher};

use super::error::WatcherError;

/// File name pattern the external application uses for its logs.
pub const DEFAULT_FILE_PATTERN: &str = "output_log_*.txt";

/// A log file found by [`LogFileScanner::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    pub path: PathBuf,
    /// File name, used as the cursor key and event source.
    pub name: String,
    pub len: u64,
    /// Creation time, or modification time where the platform has none.
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// Compile a file name glob. See `globset` for the syntax.
///
/// # Errors
///
/// Returns an error if `pattern` is not a valid glob.
pub fn compile_file_pattern(pattern: &str) -> Result<GlobMatcher, WatcherError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|source| WatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Enumerates log files in a directory.
#[derive(Debug, Clone)]
pub struct LogFileScanner {
    dir: PathBuf,
    pattern: GlobMatcher,
}

impl LogFileScanner {
    /// Create a scanner for `dir` matching file names against `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a usable glob.
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, WatcherError> {
        Ok(Self {
            dir: dir.into(),
            pattern: compile_file_pattern(pattern)?,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `name` matches the scanner's pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// List matching files sorted by creation time, oldest first.
    ///
    /// A missing or unreadable directory yields an empty list. A directory
    /// symlink is followed; a dangling one counts as missing.
    pub async fn scan(&self) -> Vec<LogFileInfo> {
        // `metadata` follows symlinks, so this also checks a link's target.
        let is_dir = tokio::fs::metadata(&self.dir)
            .await
            .is_ok_and(|m| m.is_dir());
        if !is_dir {
            tracing::debug!(dir = %self.dir.display(), "Log directory missing, nothing to scan");
            return Vec::new();
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "Cannot read log directory");
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(dir = %self.dir.display(), error = %e, "Directory listing cut short");
                    break;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.matches(&name) {
                continue;
            }
            let path = entry.path();
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let created = metadata.created().unwrap_or(modified);
            files.push(LogFileInfo {
                path,
                name,
                len: metadata.len(),
                created,
                modified,
            });
        }

        files.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_glob_matches_default_pattern() {
        let re = compile_file_pattern(DEFAULT_FILE_PATTERN).unwrap();
        assert!(re.is_match("output_log_2024-08-30_01-43-40.txt"));
        assert!(re.is_match("output_log_.txt"));
        assert!(!re.is_match("output_log_1.txt.bak"));
        assert!(!re.is_match("xoutput_log_1.txt"));
        assert!(!re.is_match("output_log_1_txt"));
    }

    #[test]
    fn test_glob_question_mark() {
        let re = compile_file_pattern("log?.txt").unwrap();
        assert!(re.is_match("log1.txt"));
        assert!(!re.is_match("log12.txt"));
    }

    #[test]
    fn test_glob_alternation() {
        let re = compile_file_pattern("{output_log,Player}_*.txt").unwrap();
        assert!(re.is_match("output_log_1.txt"));
        assert!(re.is_match("Player_1.txt"));
        assert!(!re.is_match("other_1.txt"));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let err = LogFileScanner::new("/tmp", "output_log_[.txt").unwrap_err();
        assert!(matches!(err, WatcherError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let scanner = LogFileScanner::new("/nonexistent/log/dir-12345", DEFAULT_FILE_PATTERN).unwrap();
        assert!(scanner.scan().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_by_pattern() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("output_log_a.txt"), "a").unwrap();
        std::fs::write(temp_dir.path().join("Player.log"), "b").unwrap();
        std::fs::write(temp_dir.path().join("output_log_b.json"), "c").unwrap();
        std::fs::create_dir(temp_dir.path().join("output_log_dir.txt")).unwrap();

        let scanner = LogFileScanner::new(temp_dir.path(), DEFAULT_FILE_PATTERN).unwrap();
        let files = scanner.scan().await;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "output_log_a.txt");
        assert_eq!(files[0].len, 1);
    }

    #[tokio::test]
    async fn test_scan_orders_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("output_log_z.txt"), "old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(temp_dir.path().join("output_log_a.txt"), "new").unwrap();

        let scanner = LogFileScanner::new(temp_dir.path(), DEFAULT_FILE_PATTERN).unwrap();
        let names: Vec<_> = scanner.scan().await.into_iter().map(|f| f.name).collect();

        assert_eq!(names, vec!["output_log_z.txt", "output_log_a.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_follows_directory_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("output_log_1.txt"), "x").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let scanner = LogFileScanner::new(&link, DEFAULT_FILE_PATTERN).unwrap();
        assert_eq!(scanner.scan().await.len(), 1);

        std::fs::remove_dir_all(&real).unwrap();
        assert!(scanner.scan().await.is_empty());
    }
}
