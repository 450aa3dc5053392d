//! Per-file read position and cross-line parse state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// Cross-line state some matchers need. Owned by exactly one [`FileCursor`].
#[derive(Debug, Default, Clone)]
pub struct ParseState {
    /// Room name from the last "Entering Room" line.
    pub recent_world_name: String,
    /// Destination from the last "Destination fetching" line.
    pub location_destination: String,
    /// Last microphone reported by the voice subsystem.
    pub last_audio_device: String,
    /// Set by an audio configuration change, cleared once handled.
    pub audio_device_changed: bool,
    /// Video error texts already reported for this file.
    pub video_playback_errors: HashSet<String>,
    /// The shader keyword warning is reported once per file.
    pub shader_keywords_limit_reached: bool,
    /// Timestamp of the last dated line, if it passed filtering.
    /// Undated continuation lines are attributed to it.
    pub last_accepted_time: Option<DateTime<Utc>>,
}

impl ParseState {
    /// Forget state tied to the previous instance.
    pub fn on_instance_joined(&mut self) {
        self.last_audio_device.clear();
        self.video_playback_errors.clear();
    }
}

/// Incremental read state for one log file.
#[derive(Debug, Clone)]
pub struct FileCursor {
    file_name: String,
    /// Byte offset of the next unread byte.
    pub read_offset: u64,
    /// File length at the last scan that triggered a read.
    pub last_observed_size: Option<u64>,
    pub state: ParseState,
}

impl FileCursor {
    /// Create a cursor at the start of `file_name`.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            read_offset: 0,
            last_observed_size: None,
            state: ParseState::default(),
        }
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether a file of length `size` may hold bytes not yet examined.
    #[must_use]
    pub fn has_changed(&self, size: u64) -> bool {
        self.last_observed_size != Some(size)
    }
}
