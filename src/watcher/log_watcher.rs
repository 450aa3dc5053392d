//! Polling watch loop over a log directory.
//!
//! [`LogWatcher`] owns every [`FileCursor`] and is the only writer of them.
//! It runs on its own task; the lifecycle owner talks to it through a
//! [`WatcherHandle`] and consumers read from the shared [`EventSink`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::cursor::FileCursor;
use super::discovery::{LogFileInfo, LogFileScanner};
use super::error::WatcherError;
use super::event::{EventKind, GameLogEvent};
use super::sink::EventSink;
use super::tailer::LogTailer;
use crate::config::{LogTimeZone, WatcherConfig};

/// Lifecycle state published by the handle and read by the loop at the
/// start of every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Control {
    /// `None` until the first activation.
    watermark: Option<DateTime<Utc>>,
    active: bool,
    /// Bumped by each reset request; the loop acts on a change.
    reset_generation: u64,
}

#[derive(Debug)]
struct Shared {
    control: watch::Sender<Control>,
    closed_gracefully: AtomicBool,
    sink: EventSink,
}

/// Cloneable control surface for a [`LogWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    shared: Arc<Shared>,
}

impl WatcherHandle {
    /// Start (or keep) ticking, suppressing lines dated at or before
    /// `watermark`, an RFC 3339 timestamp such as `2021-06-23T12:00:00.000Z`.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::InvalidWatermark`] if `watermark` does not
    /// parse. The watcher state is left unchanged.
    pub fn activate(&self, watermark: &str) -> Result<(), WatcherError> {
        let parsed = DateTime::parse_from_rfc3339(watermark).map_err(|source| {
            WatcherError::InvalidWatermark {
                value: watermark.to_string(),
                source,
            }
        })?;
        self.activate_at(parsed.with_timezone(&Utc));
        Ok(())
    }

    /// [`activate`](Self::activate) with an already parsed watermark.
    pub fn activate_at(&self, watermark: DateTime<Utc>) {
        tracing::info!(watermark = %watermark, "Activating log watcher");
        self.shared.control.send_modify(|control| {
            control.watermark = Some(watermark);
            control.active = true;
        });
    }

    /// Drop every cursor and queued event on the next tick.
    pub fn request_reset(&self) {
        tracing::info!("Log watcher reset requested");
        self.shared.control.send_modify(|control| {
            control.reset_generation = control.reset_generation.wrapping_add(1);
        });
    }

    /// Stop ticking. Cursors are kept.
    pub fn deactivate(&self) {
        tracing::info!("Deactivating log watcher");
        self.shared.control.send_modify(|control| control.active = false);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.control.borrow().active
    }

    #[must_use]
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.shared.control.borrow().watermark
    }

    /// Whether the last session seen in the logs ended with an application
    /// quit rather than a crash.
    #[must_use]
    pub fn closed_gracefully(&self) -> bool {
        self.shared.closed_gracefully.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sink(&self) -> &EventSink {
        &self.shared.sink
    }
}

/// Counters for one [`LogWatcher::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Files that passed the stale check.
    pub files_tracked: usize,
    /// Files left alone because they predate the watermark.
    pub files_skipped: usize,
    /// Files actually read this tick.
    pub files_read: usize,
    pub cursors_dropped: usize,
    pub events: usize,
}

/// The watch loop.
#[derive(Debug)]
pub struct LogWatcher {
    scanner: LogFileScanner,
    cursors: HashMap<String, FileCursor>,
    shared: Arc<Shared>,
    control_rx: watch::Receiver<Control>,
    seen_reset_generation: u64,
    poll_interval: Duration,
    timezone: LogTimeZone,
    future_skew: chrono::Duration,
    skip_stale_files: bool,
}

impl LogWatcher {
    /// Create an idle watcher for `log_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured file pattern is unusable.
    pub fn new(log_dir: impl Into<PathBuf>, config: &WatcherConfig) -> Result<Self, WatcherError> {
        let scanner = LogFileScanner::new(log_dir, &config.file_pattern)?;
        let (control, control_rx) = watch::channel(Control::default());

        Ok(Self {
            scanner,
            cursors: HashMap::new(),
            shared: Arc::new(Shared {
                control,
                closed_gracefully: AtomicBool::new(false),
                sink: if config.live_feed {
                    EventSink::with_live_feed()
                } else {
                    EventSink::new()
                },
            }),
            control_rx,
            seen_reset_generation: 0,
            poll_interval: config.poll_interval(),
            timezone: config.log_timezone,
            future_skew: config.future_skew(),
            skip_stale_files: config.skip_stale_files,
        })
    }

    #[must_use]
    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        self.scanner.dir()
    }

    /// Cursor for the file named `name`, if it is tracked.
    #[must_use]
    pub fn cursor(&self, name: &str) -> Option<&FileCursor> {
        self.cursors.get(name)
    }

    /// Names of the tracked files, sorted.
    #[must_use]
    pub fn tracked_files(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.cursors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one scan-and-read pass.
    ///
    /// A pending reset is applied first, even while inactive. Per-file read
    /// failures are logged and do not stop the pass.
    pub async fn tick(&mut self) -> TickStats {
        let control = *self.control_rx.borrow_and_update();
        let mut stats = TickStats::default();

        if control.reset_generation != self.seen_reset_generation {
            self.seen_reset_generation = control.reset_generation;
            stats.cursors_dropped = self.cursors.len();
            self.cursors.clear();
            self.shared.sink.clear();
            tracing::info!(
                cursors_dropped = stats.cursors_dropped,
                "Log watcher reset applied"
            );
        }

        let (true, Some(watermark)) = (control.active, control.watermark) else {
            tracing::trace!("Log watcher inactive, skipping tick");
            return stats;
        };

        let tailer = LogTailer::new(watermark, self.timezone, self.future_skew);
        let stale_before = SystemTime::from(watermark);
        let mut present = HashSet::new();

        for info in self.scanner.scan().await {
            if self.skip_stale_files && info.modified < stale_before {
                stats.files_skipped += 1;
                tracing::trace!(file = %info.name, "Skipping file older than watermark");
                continue;
            }
            stats.files_tracked += 1;
            present.insert(info.name.clone());

            if let Some(events) = self.read_file(&tailer, &info).await {
                stats.files_read += 1;
                stats.events += events;
            }
        }

        let before = self.cursors.len();
        self.cursors.retain(|name, _| {
            let keep = present.contains(name);
            if !keep {
                tracing::debug!(file = %name, "Log file gone, dropping cursor");
            }
            keep
        });
        stats.cursors_dropped += before - self.cursors.len();

        self.shared.sink.finish_replay();

        if stats.events > 0 {
            tracing::debug!(
                files_read = stats.files_read,
                events = stats.events,
                "Tick complete"
            );
        }
        stats
    }

    /// Read new lines of one scanned file into the sink, returning the number
    /// of events, or `None` if the file has not changed size since its last
    /// successful read.
    async fn read_file(&mut self, tailer: &LogTailer, info: &LogFileInfo) -> Option<usize> {
        let cursor = self.cursors.entry(info.name.clone()).or_insert_with(|| {
            tracing::debug!(file = %info.name, "Tracking new log file");
            FileCursor::new(info.name.clone())
        });
        if !cursor.has_changed(info.len) {
            return None;
        }

        let mut events = Vec::new();
        if let Err(e) = tailer.tail(&info.path, cursor, &mut events).await {
            // Size stays unrecorded so the file is retried next tick.
            tracing::warn!(path = %info.path.display(), error = %e, "Failed to read log file");
        }
        let count = events.len();
        self.publish(events);
        Some(count)
    }

    fn publish(&self, events: Vec<GameLogEvent>) {
        for event in &events {
            match event.kind {
                EventKind::Location { .. } => {
                    self.shared.closed_gracefully.store(false, Ordering::Relaxed);
                }
                EventKind::ApplicationQuit => {
                    self.shared.closed_gracefully.store(true, Ordering::Relaxed);
                }
                _ => {}
            }
        }
        self.shared.sink.extend(events);
    }

    /// Tick every poll interval until `cancel` fires. Handle calls wake the
    /// loop early.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            dir = %self.scanner.dir().display(),
            interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Log watcher started"
        );

        loop {
            self.tick().await;

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Log watcher stopped");
                    break;
                }
                _ = self.control_rx.changed() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
