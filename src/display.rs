//! Colored terminal output for the live event feed.

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local, Utc};
use owo_colors::OwoColorize;

use crate::watcher::{EventKind, GameLogEvent};

/// Maximum length for truncated field values.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to `max_len` characters, adding an ellipsis if cut.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

fn label(kind: &EventKind) -> String {
    let tag = format!("[{}]", kind.tag().to_uppercase());
    match kind {
        EventKind::Location { .. } | EventKind::LocationDestination { .. } => {
            tag.blue().bold().to_string()
        }
        EventKind::PlayerJoined { .. } => tag.green().bold().to_string(),
        EventKind::PlayerLeft { .. } => tag.yellow().bold().to_string(),
        EventKind::UdonException { .. } => tag.red().bold().to_string(),
        EventKind::Message { text } if text.starts_with("VideoError") => {
            tag.red().bold().to_string()
        }
        EventKind::VideoPlay { .. } | EventKind::VideoSync { .. } => {
            tag.magenta().bold().to_string()
        }
        EventKind::ApplicationQuit | EventKind::OpenVrInit | EventKind::DesktopMode => {
            tag.cyan().bold().to_string()
        }
        _ => tag.bold().to_string(),
    }
}

/// One event as a single display line, without colors applied to fields.
#[must_use]
pub fn format_fields(kind: &EventKind, raw_mode: bool) -> String {
    kind.fields()
        .into_iter()
        .filter(|f| !f.is_empty())
        .map(|f| truncate(&f.replace('\n', " "), DEFAULT_MAX_LEN, raw_mode))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Print a live-feed event.
pub fn print_event(event: &GameLogEvent, raw_mode: bool) {
    let local = event.timestamp.with_timezone(&Local);
    println!(
        "{} {} {}",
        local.format("%Y-%m-%d %H:%M:%S").dimmed(),
        label(&event.kind),
        format_fields(&event.kind, raw_mode)
    );
    let _ = io::stdout().flush();
}

/// Print watch start information.
pub fn print_watch_start(dir: &Path, watermark: DateTime<Utc>) {
    println!(
        "{} watching {} (events after {})",
        "[WATCH]".blue().bold(),
        dir.display().cyan(),
        watermark.format("%Y-%m-%d %H:%M:%S UTC").dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the shutdown summary.
pub fn print_watch_summary(stored: Option<u64>, closed_gracefully: bool) {
    let stored = stored.map_or(String::new(), |n| format!(", {n} events stored"));
    if closed_gracefully {
        println!(
            "{} stopped{stored}; last game session closed normally",
            "[WATCH]".blue().bold()
        );
    } else {
        println!(
            "{} stopped{stored}; last game session did {} close normally",
            "[WATCH]".blue().bold(),
            "not".yellow()
        );
    }
    let _ = io::stdout().flush();
}
