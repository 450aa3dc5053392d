//! Incremental game log watcher.
//!
//! Tails the rotating log files an external application writes, classifies
//! lines into [`GameLogEvent`]s and queues them in an [`EventSink`].

mod classifier;
mod cursor;
mod discovery;
mod error;
mod event;
mod log_watcher;
mod sink;
mod tailer;

pub use classifier::{
    classify, has_message_shape, rules_for, split_user_info, udon_exception, Matcher, Outcome,
    Rule, BRACKETED_RULES, MESSAGE_OFFSET, PLAIN_RULES,
};
pub use cursor::{FileCursor, ParseState};
pub use discovery::{compile_file_pattern, LogFileInfo, LogFileScanner, DEFAULT_FILE_PATTERN};
pub use error::WatcherError;
pub use event::{EventKind, GameLogEvent, TIMESTAMP_FORMAT};
pub use log_watcher::{LogWatcher, TickStats, WatcherHandle};
pub use sink::{EventSink, DEFAULT_DRAIN_LIMIT};
pub use tailer::{LogTailer, TailStats, LOG_DATE_FORMAT};
