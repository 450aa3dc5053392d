//! Incremental log file reader.
//!
//! Reads lines appended to a log file since the cursor's offset, filters them
//! by timestamp and hands them to the classifier.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use super::classifier;
use super::cursor::{FileCursor, ParseState};
use super::error::WatcherError;
use super::event::{EventKind, GameLogEvent};
use crate::config::LogTimeZone;

/// Format of the timestamp that opens every dated line.
pub const LOG_DATE_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

const LOG_DATE_LEN: usize = 19;

/// Counters for one [`LogTailer::tail`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailStats {
    /// Bytes consumed, complete lines only.
    pub bytes_read: u64,
    pub lines: usize,
    pub events: usize,
    /// The file was shorter than the cursor offset and was re-read from 0.
    pub truncated: bool,
}

/// Outcome of timestamp filtering for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineTime {
    Accepted(DateTime<Utc>),
    /// Dated, but filtered out or unparseable.
    Rejected,
    /// Not a dated message line.
    Undated,
}

/// Reads new lines from log files, applying the watermark and skew filters.
#[derive(Debug, Clone)]
pub struct LogTailer {
    watermark: DateTime<Utc>,
    timezone: LogTimeZone,
    future_skew: chrono::Duration,
}

impl LogTailer {
    /// Create a tailer that drops lines dated at or before `watermark` and
    /// lines more than `future_skew` ahead of the wall clock.
    #[must_use]
    pub fn new(
        watermark: DateTime<Utc>,
        timezone: LogTimeZone,
        future_skew: chrono::Duration,
    ) -> Self {
        Self {
            watermark,
            timezone,
            future_skew,
        }
    }

    #[must_use]
    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// Read everything after `cursor.read_offset`, appending events to `out`.
    ///
    /// Only newline-terminated lines are consumed. A trailing partial line
    /// stays unread and is picked up once the writer finishes it. If the file
    /// is shorter than the offset it was truncated or replaced, and reading
    /// starts over from the beginning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read. Events read
    /// before an I/O failure are kept in `out` and the cursor stays at the
    /// end of the last complete line. The observed size is only recorded on
    /// success, so a failed file is read again on the next call.
    pub async fn tail(
        &self,
        path: &Path,
        cursor: &mut FileCursor,
        out: &mut Vec<GameLogEvent>,
    ) -> Result<TailStats, WatcherError> {
        let mut file = File::open(path)
            .await
            .map_err(|e| WatcherError::from_io(path, e))?;
        let file_len = file.metadata().await?.len();
        let mut stats = TailStats::default();

        if file_len < cursor.read_offset {
            tracing::warn!(
                path = %path.display(),
                old_offset = cursor.read_offset,
                new_len = file_len,
                "File truncated, resetting offset to 0"
            );
            cursor.read_offset = 0;
            stats.truncated = true;
        }
        if file_len == cursor.read_offset {
            cursor.last_observed_size = Some(file_len);
            return Ok(stats);
        }

        file.seek(std::io::SeekFrom::Start(cursor.read_offset))
            .await?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let now = Utc::now();

        loop {
            buf.clear();
            let bytes_read = reader.read_until(b'\n', &mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                tracing::trace!(
                    path = %path.display(),
                    offset = cursor.read_offset,
                    "Partial line left for the next read"
                );
                break;
            }

            cursor.read_offset += bytes_read as u64;
            stats.bytes_read += bytes_read as u64;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            stats.lines += 1;

            if let Some((timestamp, kind)) = self.process_line(line, &mut cursor.state, now) {
                out.push(GameLogEvent::new(cursor.file_name(), timestamp, kind));
                stats.events += 1;
            }
        }

        cursor.last_observed_size = Some(file_len);
        tracing::debug!(
            path = %path.display(),
            offset = cursor.read_offset,
            lines = stats.lines,
            events = stats.events,
            "Tailed log file"
        );
        Ok(stats)
    }

    /// Filter and classify one line, without its terminator.
    ///
    /// `now` is the wall clock the future-skew check compares against.
    pub fn process_line(
        &self,
        line: &str,
        state: &mut ParseState,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, EventKind)> {
        let time = self.line_time(line, now);
        match time {
            LineTime::Accepted(t) => state.last_accepted_time = Some(t),
            LineTime::Rejected => state.last_accepted_time = None,
            LineTime::Undated => {}
        }

        if let Some(kind) = classifier::udon_exception(line) {
            return match time {
                LineTime::Accepted(t) => Some((t, kind)),
                LineTime::Undated => state.last_accepted_time.map(|t| (t, kind)),
                LineTime::Rejected => None,
            };
        }

        let LineTime::Accepted(timestamp) = time else {
            return None;
        };
        classifier::classify(line, state).map(|kind| (timestamp, kind))
    }

    fn line_time(&self, line: &str, now: DateTime<Utc>) -> LineTime {
        if !classifier::has_message_shape(line) {
            return LineTime::Undated;
        }
        let Some(stamp) = line.get(..LOG_DATE_LEN) else {
            return LineTime::Undated;
        };

        let naive = match NaiveDateTime::parse_from_str(stamp, LOG_DATE_FORMAT) {
            Ok(naive) => naive,
            Err(e) => {
                tracing::warn!(line = %line, error = %e, "Failed to parse log date");
                return LineTime::Rejected;
            }
        };

        let timestamp = self.timezone.to_utc(naive);
        if timestamp <= self.watermark {
            return LineTime::Rejected;
        }
        if timestamp > now + self.future_skew {
            tracing::warn!(
                line = %line,
                timestamp = %timestamp,
                "Log date is too far in the future, skipping line"
            );
            return LineTime::Rejected;
        }
        LineTime::Accepted(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn log_line(ts: &str, message: &str) -> String {
        format!("{ts} {:<11}-  {message}\n", "Log")
    }

    fn epoch_tailer() -> LogTailer {
        LogTailer::new(
            DateTime::<Utc>::UNIX_EPOCH,
            LogTimeZone::Utc,
            chrono::Duration::minutes(61),
        )
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn rows(events: &[GameLogEvent]) -> Vec<Vec<String>> {
        events.iter().map(GameLogEvent::to_row).collect()
    }

    #[tokio::test]
    async fn test_tail_reads_events_and_advances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(
            &path,
            &log_line("2020.10.31 23:36:58", "[NetworkManager] OnPlayerJoined pypy"),
        );

        let tailer = epoch_tailer();
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        let stats = tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        assert_eq!(
            rows(&events),
            vec![vec![
                "output_log_1.txt",
                "2020-10-31T23:36:58.000Z",
                "player-joined",
                "pypy",
                ""
            ]]
        );
        assert_eq!(stats.events, 1);
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(cursor.read_offset, len);
        assert_eq!(cursor.last_observed_size, Some(len));
    }

    #[tokio::test]
    async fn test_tail_is_idempotent_without_new_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(&path, &log_line("2021.06.23 12:02:56", "VR Disabled"));

        let tailer = epoch_tailer();
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_tail_reads_only_appended_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(&path, &log_line("2021.06.23 12:02:56", "VR Disabled"));

        let tailer = epoch_tailer();
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        append(
            &path,
            &log_line("2021.06.23 12:03:10", "[Behaviour] OnPlayerLeft pypy"),
        );
        let mut more = Vec::new();
        tailer.tail(&path, &mut cursor, &mut more).await.unwrap();

        assert_eq!(more.len(), 1);
        assert_eq!(more[0].kind.tag(), "player-left");
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        let complete = log_line("2021.06.23 12:02:56", "VR Disabled");
        let partial = log_line("2021.06.23 12:02:57", "[Behaviour] OnPlayerJoined pypy");
        let (head, rest) = partial.split_at(40);
        append(&path, &complete);
        append(&path, head);

        let tailer = epoch_tailer();
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(cursor.read_offset, complete.len() as u64);

        append(&path, rest);
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind.fields(), vec!["pypy", ""]);
    }

    #[tokio::test]
    async fn test_watermark_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(&path, &log_line("2021.06.23 12:00:00", "VR Disabled"));
        append(&path, &log_line("2021.06.23 12:00:01", "Initializing VRSDK."));

        let watermark = Utc.with_ymd_and_hms(2021, 6, 23, 12, 0, 0).unwrap();
        let tailer = LogTailer::new(watermark, LogTimeZone::Utc, chrono::Duration::minutes(61));
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        let stats = tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        assert_eq!(stats.lines, 2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::OpenVrInit);
    }

    #[test]
    fn test_future_skew_rejected() {
        let tailer = epoch_tailer();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut state = ParseState::default();

        let ahead = log_line("2024.03.01 11:02:00", "VR Disabled");
        assert!(tailer.process_line(ahead.trim_end(), &mut state, now).is_none());

        let near = log_line("2024.03.01 10:59:00", "VR Disabled");
        let (timestamp, kind) = tailer.process_line(near.trim_end(), &mut state, now).unwrap();
        assert_eq!(kind, EventKind::DesktopMode);
        assert_eq!(timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 10, 59, 0).unwrap());
    }

    #[test]
    fn test_unparseable_date_dropped() {
        let tailer = epoch_tailer();
        let mut state = ParseState::default();
        let line = log_line("2021.13.45 99:99:99", "VR Disabled");
        assert!(tailer
            .process_line(line.trim_end(), &mut state, Utc::now())
            .is_none());
    }

    #[test]
    fn test_udon_continuation_inherits_last_timestamp() {
        let tailer = epoch_tailer();
        let mut state = ParseState::default();
        let now = Utc::now();
        let continuation =
            "VRC.Udon.VM.UdonVMException: outer ---> VRC.Udon.VM.UdonVMException: inner";

        // Nothing accepted yet in this file.
        assert!(tailer.process_line(continuation, &mut state, now).is_none());

        let dated = log_line("2021.06.23 12:02:56", "[Behaviour] Something failed");
        assert!(tailer.process_line(dated.trim_end(), &mut state, now).is_none());

        let (timestamp, kind) = tailer.process_line(continuation, &mut state, now).unwrap();
        assert_eq!(kind.tag(), "udon-exception");
        assert_eq!(timestamp, Utc.with_ymd_and_hms(2021, 6, 23, 12, 2, 56).unwrap());
    }

    #[test]
    fn test_udon_continuation_after_rejected_line_dropped() {
        let watermark = Utc.with_ymd_and_hms(2021, 6, 23, 12, 0, 0).unwrap();
        let tailer = LogTailer::new(watermark, LogTimeZone::Utc, chrono::Duration::minutes(61));
        let mut state = ParseState::default();
        let now = Utc::now();

        let accepted = log_line("2021.06.23 12:02:56", "VR Disabled");
        tailer.process_line(accepted.trim_end(), &mut state, now);
        let old = log_line("2021.06.23 11:00:00", "[Behaviour] Something failed");
        tailer.process_line(old.trim_end(), &mut state, now);

        let continuation = " ---> VRC.Udon.VM.UdonVMException: inner";
        assert!(tailer.process_line(continuation, &mut state, now).is_none());
    }

    #[test]
    fn test_dated_pypy_line_is_udon_exception() {
        let tailer = epoch_tailer();
        let mut state = ParseState::default();
        let line = log_line("2021.06.23 12:02:56", "[PyPyDance] song queued");
        let (_, kind) = tailer
            .process_line(line.trim_end(), &mut state, Utc::now())
            .unwrap();
        assert_eq!(kind.fields(), vec![line.trim_end()]);
    }

    #[tokio::test]
    async fn test_truncated_file_reread_from_start() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(&path, &log_line("2021.06.23 12:02:56", "VR Disabled"));
        append(&path, &log_line("2021.06.23 12:02:57", "VR Disabled"));

        let tailer = epoch_tailer();
        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        tailer.tail(&path, &mut cursor, &mut events).await.unwrap();

        std::fs::write(&path, log_line("2021.06.23 13:00:00", "Initializing VRSDK.")).unwrap();
        let mut after = Vec::new();
        let stats = tailer.tail(&path, &mut cursor, &mut after).await.unwrap();

        assert!(stats.truncated);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].kind, EventKind::OpenVrInit);
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        let line = log_line("2021.06.23 12:02:56", "[Behaviour] OnPlayerJoined pypy (usr_1)");
        append(&path, &line.replace('\n', "\r\n"));

        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        epoch_tailer()
            .tail(&path, &mut cursor, &mut events)
            .await
            .unwrap();

        assert_eq!(events[0].kind.fields(), vec!["pypy", "usr_1"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_file_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_gone.txt");
        let mut cursor = FileCursor::new("output_log_gone.txt");
        let mut events = Vec::new();

        let err = epoch_tailer()
            .tail(&path, &mut cursor, &mut events)
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::FileDeleted(_)));
        assert_eq!(cursor.last_observed_size, None);
        assert!(cursor.has_changed(0));
    }

    #[tokio::test]
    async fn test_events_keep_file_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output_log_1.txt");
        append(&path, &log_line("2021.06.23 12:00:01", "[Behaviour] Entering Room: Home"));
        append(&path, &log_line("2021.06.23 12:00:02", "[Behaviour] Joining wrld_1:1"));
        append(&path, &log_line("2021.06.23 12:00:03", "[Behaviour] OnPlayerJoined a"));
        append(&path, &log_line("2021.06.23 12:00:04", "[Behaviour] OnPlayerLeft a"));

        let mut cursor = FileCursor::new("output_log_1.txt");
        let mut events = Vec::new();
        epoch_tailer()
            .tail(&path, &mut cursor, &mut events)
            .await
            .unwrap();

        let tags: Vec<_> = events.iter().map(|e| e.kind.tag()).collect();
        assert_eq!(tags, vec!["location", "player-joined", "player-left"]);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(events[0].kind.fields(), vec!["wrld_1:1", "Home"]);
    }
}
