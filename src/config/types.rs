//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::watcher::DEFAULT_FILE_PATTERN;

/// Zone the log writer uses for its wall-clock timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogTimeZone {
    /// The machine's local zone.
    #[default]
    Local,
    Utc,
}

impl LogTimeZone {
    /// Interpret a naive log timestamp in this zone.
    #[must_use]
    pub fn to_utc(self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Self::Utc => Utc.from_utc_datetime(&naive),
            Self::Local => local_to_utc(&Local, naive),
        }
    }
}

/// Resolve a wall-clock time in `tz` to UTC.
///
/// A time repeated by a backward clock change resolves to its first
/// occurrence. A time skipped by a forward change is read with the offset in
/// force before the change, which equals shifting it forward by the gap.
fn local_to_utc<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        LocalResult::None => {
            // Zone transitions are at least a day apart.
            let before = tz
                .offset_from_utc_datetime(&(naive - chrono::Duration::days(1)))
                .fix();
            Utc.from_utc_datetime(&(naive - before))
        }
    }
}

/// Watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Directory holding the log files.
    pub log_dir: Option<PathBuf>,
    /// File name glob, `*` and `?` only.
    pub file_pattern: String,
    /// Delay between scans.
    pub poll_interval_ms: u64,
    /// Upper bound for one drain of the event sink.
    pub drain_limit: usize,
    /// Lines dated further ahead of now are rejected.
    pub future_skew_minutes: i64,
    pub log_timezone: LogTimeZone,
    /// Leave files untouched since before the watermark alone.
    pub skip_stale_files: bool,
    /// Keep a live feed of new events beside the backlog. Only enable it
    /// with a consumer that drains the feed.
    pub live_feed: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            poll_interval_ms: 1000,
            drain_limit: 1000,
            future_skew_minutes: 61,
            log_timezone: LogTimeZone::default(),
            skip_stale_files: true,
            live_feed: false,
        }
    }
}

impl WatcherConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn future_skew(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.future_skew_minutes)
    }
}

/// Event store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: crate::store::default_store_path(),
        }
    }
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub watcher: WatcherConfig,
    pub store: StoreConfig,
}
