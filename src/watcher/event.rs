//! Classified game log events.
//!
//! An event travels to consumers as a positional row of strings:
//! `[source_file, timestamp, tag, field1, field2, ...]`. Consumers index
//! into that row, so the field order of every kind is fixed.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeSeq, Serializer};

/// Format used for the timestamp column of an event row.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// The kind of a classified log line and its kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Joined an instance. `world_name` comes from the preceding room entry.
    Location { location: String, world_name: String },
    /// Left a room; carries the last fetched destination, if any.
    LocationDestination { destination: String },
    PlayerJoined { display_name: String, user_id: String },
    PlayerLeft { display_name: String, user_id: String },
    PortalSpawn,
    Notification { data: String },
    ApiRequest { url: String },
    AvatarChange { display_name: String, avatar_name: String },
    /// Free-form message for the notification layer.
    Message { text: String },
    VideoPlay { url: String, display_name: Option<String> },
    VideoSync { position: String },
    /// World-emitted `[VRCX]` data line.
    WorldData { data: String },
    Screenshot { path: String },
    ResourceLoadString { url: String },
    ResourceLoadImage { url: String },
    UdonException { data: String },
    /// The application quit through its own shutdown path.
    ApplicationQuit,
    OpenVrInit,
    DesktopMode,
    StickerSpawn {
        user_id: String,
        display_name: String,
        inventory_id: String,
    },
}

impl EventKind {
    /// Wire tag for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Location { .. } => "location",
            Self::LocationDestination { .. } => "location-destination",
            Self::PlayerJoined { .. } => "player-joined",
            Self::PlayerLeft { .. } => "player-left",
            Self::PortalSpawn => "portal-spawn",
            Self::Notification { .. } => "notification",
            Self::ApiRequest { .. } => "api-request",
            Self::AvatarChange { .. } => "avatar-change",
            Self::Message { .. } => "event",
            Self::VideoPlay { .. } => "video-play",
            Self::VideoSync { .. } => "video-sync",
            Self::WorldData { .. } => "vrcx",
            Self::Screenshot { .. } => "screenshot",
            Self::ResourceLoadString { .. } => "resource-load-string",
            Self::ResourceLoadImage { .. } => "resource-load-image",
            Self::UdonException { .. } => "udon-exception",
            Self::ApplicationQuit => "vrc-quit",
            Self::OpenVrInit => "openvr-init",
            Self::DesktopMode => "desktop-mode",
            Self::StickerSpawn { .. } => "sticker-spawn",
        }
    }

    /// Kind-specific trailing fields, in wire order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Location {
                location,
                world_name,
            } => vec![location.as_str(), world_name.as_str()],
            Self::PlayerJoined {
                display_name,
                user_id,
            }
            | Self::PlayerLeft {
                display_name,
                user_id,
            } => vec![display_name.as_str(), user_id.as_str()],
            Self::AvatarChange {
                display_name,
                avatar_name,
            } => vec![display_name.as_str(), avatar_name.as_str()],
            Self::VideoPlay { url, display_name } => match display_name {
                Some(name) => vec![url.as_str(), name.as_str()],
                None => vec![url.as_str()],
            },
            Self::StickerSpawn {
                user_id,
                display_name,
                inventory_id,
            } => vec![user_id.as_str(), display_name.as_str(), inventory_id.as_str()],
            Self::LocationDestination { destination: s }
            | Self::Notification { data: s }
            | Self::ApiRequest { url: s }
            | Self::Message { text: s }
            | Self::VideoSync { position: s }
            | Self::WorldData { data: s }
            | Self::Screenshot { path: s }
            | Self::ResourceLoadString { url: s }
            | Self::ResourceLoadImage { url: s }
            | Self::UdonException { data: s } => vec![s.as_str()],
            Self::PortalSpawn | Self::ApplicationQuit | Self::OpenVrInit | Self::DesktopMode => {
                Vec::new()
            }
        }
    }
}

/// One classified log occurrence. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLogEvent {
    /// File name (not path) of the log the line came from.
    pub source_file: String,
    /// Line timestamp converted to UTC.
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl GameLogEvent {
    #[must_use]
    pub fn new(source_file: impl Into<String>, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            source_file: source_file.into(),
            timestamp,
            kind,
        }
    }

    /// Timestamp in the row format, e.g. `2020-10-31T23:36:58.000Z`.
    #[must_use]
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Positional row handed to consumers.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.source_file.clone(),
            self.timestamp_string(),
            self.kind.tag().to_string(),
        ];
        row.extend(self.kind.fields().into_iter().map(str::to_string));
        row
    }
}

impl Serialize for GameLogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.kind.fields();
        let mut seq = serializer.serialize_seq(Some(3 + fields.len()))?;
        seq.serialize_element(&self.source_file)?;
        seq.serialize_element(&self.timestamp_string())?;
        seq.serialize_element(self.kind.tag())?;
        for field in fields {
            seq.serialize_element(field)?;
        }
        seq.end()
    }
}
