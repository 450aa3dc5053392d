//! Integration tests for storing drained events and resuming from them.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use gamelog_watcher::config::{LogTimeZone, WatcherConfig};
use gamelog_watcher::store::EventStore;
use gamelog_watcher::watcher::{LogWatcher, DEFAULT_DRAIN_LIMIT};
use tempfile::TempDir;

fn append(path: &Path, lines: &[(&str, &str)]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("Failed to open log file");
    for (ts, message) in lines {
        writeln!(file, "{ts} Log        -  {message}").expect("Failed to write log file");
    }
}

fn utc_config() -> WatcherConfig {
    WatcherConfig {
        log_timezone: LogTimeZone::Utc,
        ..WatcherConfig::default()
    }
}

fn temp_db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("db").join("gamelog.db")
}

/// One session of the CLI: resume from the store, tick once, store everything.
async fn run_session(log_dir: &Path, db_path: &Path) -> usize {
    let store = EventStore::open(db_path).await.expect("Failed to open store");
    let resume_from = store
        .latest_timestamp()
        .await
        .expect("Failed to query latest timestamp")
        .unwrap_or(chrono::DateTime::<Utc>::UNIX_EPOCH);

    let mut watcher = LogWatcher::new(log_dir, &utc_config()).expect("Failed to create watcher");
    let handle = watcher.handle();
    handle.activate_at(resume_from);
    watcher.tick().await;

    let batch = handle.sink().drain(DEFAULT_DRAIN_LIMIT);
    store.insert_events(&batch).await.expect("Failed to store events")
}

/// Test that restarting from the stored watermark does not duplicate events.
#[tokio::test]
async fn test_resume_from_store_has_no_duplicates() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let log_dir = temp_dir.path().join("logs");
    std::fs::create_dir(&log_dir).expect("Failed to create log dir");
    let log = log_dir.join("output_log_1.txt");
    let db_path = temp_db_path(&temp_dir);

    append(
        &log,
        &[
            ("2021.06.23 12:00:00", "[Behaviour] OnPlayerJoined a"),
            ("2021.06.23 12:00:01", "[Behaviour] OnPlayerJoined b"),
        ],
    );
    assert_eq!(run_session(&log_dir, &db_path).await, 2);

    // Nothing new: a restart stores nothing.
    assert_eq!(run_session(&log_dir, &db_path).await, 0);

    append(&log, &[("2021.06.23 12:00:02", "[Behaviour] OnPlayerLeft a")]);
    assert_eq!(run_session(&log_dir, &db_path).await, 1);

    let store = EventStore::open(&db_path).await.expect("Failed to open store");
    assert_eq!(store.count().await.expect("Failed to count"), 3);
    assert_eq!(
        store.latest_timestamp().await.expect("Failed to query"),
        Some(Utc.with_ymd_and_hms(2021, 6, 23, 12, 0, 2).unwrap())
    );

    let recent = store.recent(10).await.expect("Failed to read recent");
    let tags: Vec<_> = recent.iter().map(|e| e.tag.as_str()).collect();
    assert_eq!(tags, vec!["player-left", "player-joined", "player-joined"]);
    assert_eq!(
        recent[0].to_row(),
        vec![
            "output_log_1.txt",
            "2021-06-23T12:00:02.000Z",
            "player-left",
            "a",
            ""
        ]
    );
}

/// Test that stored rows keep the fields of every event kind.
#[tokio::test]
async fn test_stored_rows_match_drained_rows() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let log = temp_dir.path().join("output_log_1.txt");
    append(
        &log,
        &[
            ("2021.06.23 12:00:00", "[Behaviour] Entering Room: Home"),
            ("2021.06.23 12:00:01", "[Behaviour] Joining wrld_1:123"),
            ("2021.06.23 12:00:02", "[Behaviour] OnPlayerJoined Natsumi-sama (usr_032383a7)"),
            ("2021.06.23 12:00:03", "VRCApplication: OnApplicationQuit at 300.2"),
        ],
    );

    let mut watcher = LogWatcher::new(temp_dir.path(), &utc_config()).expect("Failed to create watcher");
    let handle = watcher.handle();
    handle.activate("2021-06-23T00:00:00Z").expect("Failed to activate");
    watcher.tick().await;
    let drained = handle.sink().drain(DEFAULT_DRAIN_LIMIT);
    assert_eq!(drained.len(), 3);

    let store = EventStore::open_in_memory().await.expect("Failed to open store");
    store.insert_events(&drained).await.expect("Failed to store events");

    let mut stored: Vec<_> = store
        .recent(10)
        .await
        .expect("Failed to read recent")
        .iter()
        .map(|e| e.to_row())
        .collect();
    stored.reverse();
    let expected: Vec<_> = drained.iter().map(|e| e.to_row()).collect();
    assert_eq!(stored, expected);
}
