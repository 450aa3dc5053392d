//! Line classification.
//!
//! A log line looks like
//!
//! ```text
//! 2021.06.23 12:02:56 Log        -  [Behaviour] Entering Room: VRChat Home
//! ```
//!
//! The timestamp fills the first 19 columns, the `-` separator sits at
//! column 31 and the message starts at column 34. Messages that start with
//! `[` carry a subsystem tag and go through [`BRACKETED_RULES`]; the rest go
//! through [`PLAIN_RULES`]. Rules run in order and the first one that claims
//! the line wins, whether or not it produced an event.
//!
//! The column positions are a compatibility contract with the log writer.

use super::cursor::ParseState;
use super::event::EventKind;

/// Column at which the message text begins.
pub const MESSAGE_OFFSET: usize = 34;

/// Column holding the `-` separator.
const SEPARATOR_COLUMN: usize = 31;

/// Lines this short or shorter cannot carry a message.
const MIN_MESSAGE_LINE_LEN: usize = 36;

const BOT_CHECK_ERROR: &str = "Sign in to confirm";
const BOT_CHECK_HINT: &str = "[VRCX] Fix error with this: https://github.com/EllyVR/VRCVideoCacher";

/// Requests the companion app makes to itself show up as downloads.
const SELF_REQUEST_PREFIXES: [&str; 2] = ["http://127.0.0.1:22500", "http://localhost:22500"];

/// Result of offering a line to one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not this rule's line; try the next rule.
    Skip,
    /// Claimed, nothing to emit.
    Consumed,
    /// Claimed, emit this event.
    Emit(EventKind),
}

/// A rule: pure function of the line, the message offset and the per-file
/// state.
pub type Matcher = fn(&str, usize, &mut ParseState) -> Outcome;

/// A named rule in a classification chain.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub matcher: Matcher,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

const fn rule(name: &'static str, matcher: Matcher) -> Rule {
    Rule { name, matcher }
}

/// Rules for messages starting with a `[Subsystem]` tag, in priority order.
pub static BRACKETED_RULES: &[Rule] = &[
    rule("player-joined", player_joined),
    rule("player-left", player_left),
    rule("location", location),
    rule("location-destination", location_destination),
    rule("portal-spawn", portal_spawn),
    rule("notification", notification),
    rule("api-request", api_request),
    rule("avatar-change", avatar_change),
    rule("join-blocked", join_blocked),
    rule("avatar-pedestal", avatar_pedestal),
    rule("video-error", video_error),
    rule("video-resolve", video_resolve),
    rule("avpro-video-resolve", avpro_video_resolve),
    rule("usharp-video-play", usharp_video_play),
    rule("usharp-video-sync", usharp_video_sync),
    rule("world-data", world_data),
    rule("world-store", world_store),
    rule("audio-device", audio_device),
    rule("screenshot", screenshot),
    rule("string-download", string_download),
    rule("image-download", image_download),
    rule("vote-kick", vote_kick),
    rule("failed-to-join", failed_to_join),
    rule("instance-reset-warning", instance_reset_warning),
    rule("vote-kick-initiated", vote_kick_initiated),
    rule("vote-kick-succeeded", vote_kick_succeeded),
    rule("sticker-spawn", sticker_spawn),
];

/// Rules for untagged system messages, in priority order.
pub static PLAIN_RULES: &[Rule] = &[
    rule("shader-keyword-limit", shader_keyword_limit),
    rule("sdk2-video-play", sdk2_video_play),
    rule("application-quit", application_quit),
    rule("vr-init", vr_init),
    rule("desktop-mode", desktop_mode),
    rule("osc-failed", osc_failed),
    rule("untrusted-url", untrusted_url),
];

/// Whether `line` has the separator where a dated message line has it.
#[must_use]
pub fn has_message_shape(line: &str) -> bool {
    line.len() > MIN_MESSAGE_LINE_LEN && line.as_bytes()[SEPARATOR_COLUMN] == b'-'
}

/// The chain that handles `line`.
#[must_use]
pub fn rules_for(line: &str) -> &'static [Rule] {
    if line.as_bytes().get(MESSAGE_OFFSET) == Some(&b'[') {
        BRACKETED_RULES
    } else {
        PLAIN_RULES
    }
}

/// Run the matching chain over a dated message line.
///
/// Unrecognised lines return `None`; most of the log is noise.
pub fn classify(line: &str, state: &mut ParseState) -> Option<EventKind> {
    for rule in rules_for(line) {
        match (rule.matcher)(line, MESSAGE_OFFSET, state) {
            Outcome::Skip => {}
            Outcome::Consumed => {
                tracing::trace!(rule = rule.name, "Line consumed without event");
                return None;
            }
            Outcome::Emit(kind) => {
                tracing::trace!(rule = rule.name, tag = kind.tag(), "Line classified");
                return Some(kind);
            }
        }
    }
    None
}

/// Script-engine exception lines, recognised before any shape check because
/// their continuation lines carry no timestamp.
#[must_use]
pub fn udon_exception(line: &str) -> Option<EventKind> {
    if line.contains("[PyPyDance]") {
        return Some(EventKind::UdonException {
            data: line.to_string(),
        });
    }
    let pos = line.find(" ---> VRC.Udon.VM.UdonVMException: ")?;
    Some(EventKind::UdonException {
        data: line[pos..].to_string(),
    })
}

/// Split `Name (id)` into its parts. Without parentheses the whole text is
/// the name.
#[must_use]
pub fn split_user_info(info: &str) -> (&str, &str) {
    match info.rfind(" (") {
        Some(pos) => {
            let rest = &info[pos + 2..];
            let id = rest.rfind(')').map_or(rest, |end| &rest[..end]);
            (&info[..pos], id)
        }
        None => (info, ""),
    }
}

fn tail_at(line: &str, at: usize) -> &str {
    line.get(at..).unwrap_or_default()
}

fn between(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end).unwrap_or_default()
}

fn starts_at(line: &str, offset: usize, prefix: &str) -> bool {
    line.get(offset..).is_some_and(|rest| rest.starts_with(prefix))
}

fn drop_last_char(s: &str) -> &str {
    let mut chars = s.chars();
    chars.next_back();
    chars.as_str()
}

fn message(text: impl Into<String>) -> Outcome {
    Outcome::Emit(EventKind::Message { text: text.into() })
}

fn player_info(line: &str, at: usize) -> Option<(String, String)> {
    let (display_name, user_id) = split_user_info(line.get(at..)?);
    if display_name.is_empty() && user_id.is_empty() {
        return None;
    }
    Some((display_name.to_string(), user_id.to_string()))
}

fn player_joined(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] OnPlayerJoined";
    let joined =
        line.contains("[Behaviour] OnPlayerJoined") || line.contains("[NetworkManager] OnPlayerJoined");
    if !joined || line.contains("] OnPlayerJoined:") {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Consumed;
    };
    match player_info(line, pos + MARKER.len() + 1) {
        Some((display_name, user_id)) => Outcome::Emit(EventKind::PlayerJoined {
            display_name,
            user_id,
        }),
        None => {
            tracing::warn!(line = %line, "Failed to parse player info");
            Outcome::Consumed
        }
    }
}

fn player_left(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] OnPlayerLeft";
    let left =
        line.contains("[Behaviour] OnPlayerLeft") || line.contains("[NetworkManager] OnPlayerLeft");
    if !left || line.contains("] OnPlayerLeftRoom") || line.contains("] OnPlayerLeft:") {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Consumed;
    };
    match player_info(line, pos + MARKER.len() + 1) {
        Some((display_name, user_id)) => Outcome::Emit(EventKind::PlayerLeft {
            display_name,
            user_id,
        }),
        None => {
            tracing::warn!(line = %line, "Failed to parse player info");
            Outcome::Consumed
        }
    }
}

fn location(line: &str, _offset: usize, state: &mut ParseState) -> Outcome {
    const ENTERING: &str = "] Entering Room: ";
    const JOINING: &str = "] Joining ";

    if line.contains("[Behaviour] Entering Room: ") {
        if let Some(name) = line.rfind(ENTERING).and_then(|pos| line.get(pos + ENTERING.len()..)) {
            state.recent_world_name = name.to_string();
        }
        return Outcome::Consumed;
    }

    if line.contains("[Behaviour] Joining ")
        && !line.contains("] Joining or Creating Room: ")
        && !line.contains("] Joining friend: ")
    {
        let location = line
            .rfind(JOINING)
            .map_or("", |pos| tail_at(line, pos + JOINING.len()));
        if location.is_empty() {
            return Outcome::Consumed;
        }
        state.on_instance_joined();
        return Outcome::Emit(EventKind::Location {
            location: location.to_string(),
            world_name: state.recent_world_name.clone(),
        });
    }

    Outcome::Skip
}

fn location_destination(line: &str, _offset: usize, state: &mut ParseState) -> Outcome {
    const FETCHING: &str = "] Destination fetching: ";

    if line.contains("[Behaviour] Successfully left room") {
        return Outcome::Emit(EventKind::LocationDestination {
            destination: std::mem::take(&mut state.location_destination),
        });
    }

    if line.contains("[Behaviour] Destination fetching: ") {
        let destination = line
            .rfind(FETCHING)
            .map_or("", |pos| tail_at(line, pos + FETCHING.len()));
        if !destination.is_empty() {
            state.location_destination = destination.to_string();
        }
        return Outcome::Consumed;
    }

    Outcome::Skip
}

fn portal_spawn(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    if line.contains("[Behaviour] Instantiated a (Clone [")
        && line.contains("] Portals/PortalInternalDynamic)")
    {
        Outcome::Emit(EventKind::PortalSpawn)
    } else {
        Outcome::Skip
    }
}

fn notification(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[API] Received Notification: <";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    let Some(end) = line.rfind("> received at ") else {
        return Outcome::Skip;
    };
    Outcome::Emit(EventKind::Notification {
        data: between(line, offset + PREFIX.len(), end).to_string(),
    })
}

fn api_request(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] Sending Get request to ";
    if !starts_at(line, offset, "[API] [") {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Skip;
    };
    Outcome::Emit(EventKind::ApiRequest {
        url: tail_at(line, pos + MARKER.len()).to_string(),
    })
}

fn avatar_change(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[Behaviour] Switching ";
    const MARKER: &str = " to avatar ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Skip;
    };
    Outcome::Emit(EventKind::AvatarChange {
        display_name: between(line, offset + PREFIX.len(), pos).to_string(),
        avatar_name: tail_at(line, pos + MARKER.len()).to_string(),
    })
}

fn join_blocked(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    if line.contains("] Master is not sending any events! Moving to a new instance.") {
        message("Joining instance blocked by master")
    } else {
        Outcome::Skip
    }
}

fn avatar_pedestal(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[Network Processing] RPC invoked SwitchAvatar on AvatarPedestal for ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    let user = tail_at(line, offset + PREFIX.len());
    message(format!("{user} changed avatar pedestal"))
}

/// Report a video error once per file.
fn report_video_error(data: &str, state: &mut ParseState) -> Outcome {
    if !state.video_playback_errors.insert(data.to_string()) {
        return Outcome::Consumed;
    }
    if data.contains(BOT_CHECK_ERROR) {
        message(format!("VideoError: {BOT_CHECK_HINT}\n{data}"))
    } else {
        message(format!("VideoError: {data}"))
    }
}

fn video_error(line: &str, offset: usize, state: &mut ParseState) -> Outcome {
    const PLAYBACK: &str = "[Video Playback] ERROR: ";
    const AVPRO: &str = "[AVProVideo] Error: ";

    if line.contains(PLAYBACK) {
        return report_video_error(tail_at(line, offset + PLAYBACK.len()), state);
    }
    if line.contains(AVPRO) {
        return report_video_error(tail_at(line, offset + AVPRO.len()), state);
    }
    Outcome::Skip
}

fn quoted_url(line: &str, offset: usize, prefix: &str) -> Option<String> {
    if !starts_at(line, offset, prefix) {
        return None;
    }
    Some(drop_last_char(tail_at(line, offset + prefix.len())).to_string())
}

fn video_resolve(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    match quoted_url(line, offset, "[Video Playback] Attempting to resolve URL '") {
        Some(url) => Outcome::Emit(EventKind::VideoPlay {
            url,
            display_name: None,
        }),
        None => Outcome::Skip,
    }
}

fn avpro_video_resolve(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    match quoted_url(line, offset, "[Video Playback] Resolving URL '") {
        Some(url) => Outcome::Emit(EventKind::VideoPlay {
            url,
            display_name: None,
        }),
        None => Outcome::Skip,
    }
}

fn usharp_video_play(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[USharpVideo] Started video load for URL: ";
    const MARKER: &str = ", requested by ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Skip;
    };
    Outcome::Emit(EventKind::VideoPlay {
        url: between(line, offset + PREFIX.len(), pos).to_string(),
        display_name: Some(tail_at(line, pos + MARKER.len()).to_string()),
    })
}

fn usharp_video_sync(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[USharpVideo] Syncing video to ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    Outcome::Emit(EventKind::VideoSync {
        position: tail_at(line, offset + PREFIX.len()).to_string(),
    })
}

fn world_data(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[VRCX] ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    Outcome::Emit(EventKind::WorldData {
        data: tail_at(line, offset + PREFIX.len()).to_string(),
    })
}

fn world_store(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[VRCX-World] ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    // Deprecated world persistence channel; recorded for diagnostics only.
    tracing::info!(data = %tail_at(line, offset + PREFIX.len()), "World store data");
    Outcome::Consumed
}

fn audio_device(line: &str, _offset: usize, state: &mut ParseState) -> Outcome {
    const MARKER: &str = ") '";

    if line.contains("[Always] uSpeak: OnAudioConfigurationChanged") {
        state.audio_device_changed = true;
        return Outcome::Consumed;
    }

    if !line.contains("[Always] uSpeak: SetInputDevice 0") {
        return Outcome::Skip;
    }

    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Consumed;
    };
    let quoted = tail_at(line, pos + MARKER.len());
    let device = quoted.strip_suffix('\'').unwrap_or(quoted);
    if device.is_empty() {
        return Outcome::Consumed;
    }

    let first_seen = state.last_audio_device.is_empty();
    let report = state.audio_device_changed && !first_seen && state.last_audio_device != device;
    if first_seen || report {
        state.audio_device_changed = false;
    }
    state.last_audio_device = device.to_string();

    if report {
        message(format!("Audio device changed, mic set to '{device}'"))
    } else {
        Outcome::Consumed
    }
}

fn screenshot(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] Took screenshot to: ";
    if !line.contains("[VRC Camera] Took screenshot to: ") {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Consumed;
    };
    Outcome::Emit(EventKind::Screenshot {
        path: tail_at(line, pos + MARKER.len()).to_string(),
    })
}

/// URL of a resource download line, `None` for the app's own requests.
fn download_url<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let pos = line.rfind(marker)?;
    let url = drop_last_char(tail_at(line, pos + marker.len()));
    if SELF_REQUEST_PREFIXES.iter().any(|p| url.starts_with(p)) {
        return None;
    }
    Some(url)
}

fn string_download(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] Attempting to load String from URL '";
    if !line.contains(MARKER) {
        return Outcome::Skip;
    }
    match download_url(line, MARKER) {
        Some(url) => Outcome::Emit(EventKind::ResourceLoadString {
            url: url.to_string(),
        }),
        None => Outcome::Consumed,
    }
}

fn image_download(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "] Attempting to load image from URL '";
    if !line.contains(MARKER) {
        return Outcome::Skip;
    }
    match download_url(line, MARKER) {
        Some(url) => Outcome::Emit(EventKind::ResourceLoadImage {
            url: url.to_string(),
        }),
        None => Outcome::Consumed,
    }
}

fn vote_kick(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "[Behaviour] Received executive message: ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    message(tail_at(line, offset + PREFIX.len()))
}

fn failed_to_join(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    if !starts_at(line, offset, "[Behaviour] Failed to join instance ") {
        return Outcome::Skip;
    }
    message(tail_at(line, offset + "[Behaviour] ".len()))
}

/// `[ModerationManager] <text>` lines reported with the tag stripped.
fn moderation_message(line: &str, marker: &str) -> Outcome {
    match line.find(marker) {
        Some(pos) => message(tail_at(line, pos + "[ModerationManager] ".len())),
        None => Outcome::Skip,
    }
}

fn instance_reset_warning(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    moderation_message(line, "[ModerationManager] This instance will be reset in ")
}

fn vote_kick_initiated(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    moderation_message(line, "[ModerationManager] A vote kick has been initiated against ")
}

fn vote_kick_succeeded(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    moderation_message(line, "[ModerationManager] Vote to kick ")
}

fn sticker_spawn(line: &str, _offset: usize, _state: &mut ParseState) -> Outcome {
    const MARKER: &str = "[StickersManager] User ";
    let Some(pos) = line.find(MARKER) else {
        return Outcome::Skip;
    };
    if !line.contains("inv_") || !line.contains("spawned sticker") {
        return Outcome::Skip;
    }

    let info = tail_at(line, pos + MARKER.len());
    // The id comes first here and the display name sits in the parentheses.
    let (user_id, display_name) = split_user_info(info);
    if user_id.is_empty() && display_name.is_empty() {
        tracing::warn!(line = %line, "Failed to parse sticker owner");
        return Outcome::Consumed;
    }
    let inventory_id = info.find("inv_").map_or("", |i| &info[i..]);

    Outcome::Emit(EventKind::StickerSpawn {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        inventory_id: inventory_id.to_string(),
    })
}

fn shader_keyword_limit(line: &str, _offset: usize, state: &mut ParseState) -> Outcome {
    if !line.contains("Maximum number (384) of shader global keywords exceeded") {
        return Outcome::Skip;
    }
    if state.shader_keywords_limit_reached {
        return Outcome::Consumed;
    }
    state.shader_keywords_limit_reached = true;
    message("Shader Keyword Limit has been reached")
}

fn sdk2_video_play(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    const PREFIX: &str = "User ";
    const MARKER: &str = " added URL ";
    if !starts_at(line, offset, PREFIX) {
        return Outcome::Skip;
    }
    let Some(pos) = line.rfind(MARKER) else {
        return Outcome::Skip;
    };
    Outcome::Emit(EventKind::VideoPlay {
        url: tail_at(line, pos + MARKER.len()).to_string(),
        display_name: Some(between(line, offset + PREFIX.len(), pos).to_string()),
    })
}

fn application_quit(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    if starts_at(line, offset, "VRCApplication: OnApplicationQuit at ")
        || starts_at(line, offset, "VRCApplication: HandleApplicationQuit at ")
    {
        Outcome::Emit(EventKind::ApplicationQuit)
    } else {
        Outcome::Skip
    }
}

fn vr_init(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    if starts_at(line, offset, "Initializing VRSDK.") || starts_at(line, offset, "STEAMVR HMD Model: ")
    {
        Outcome::Emit(EventKind::OpenVrInit)
    } else {
        Outcome::Skip
    }
}

fn desktop_mode(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    if starts_at(line, offset, "VR Disabled") {
        Outcome::Emit(EventKind::DesktopMode)
    } else {
        Outcome::Skip
    }
}

fn osc_failed(line: &str, offset: usize, _state: &mut ParseState) -> Outcome {
    if !starts_at(line, offset, "Could not Start OSC: ") {
        return Outcome::Skip;
    }
    message(format!(
        "VRChat couldn't start OSC server, \"{}\"",
        tail_at(line, offset)
    ))
}

fn untrusted_url(line: &str, offset: usize, state: &mut ParseState) -> Outcome {
    if !line.contains("Attempted to play an untrusted URL") {
        return Outcome::Skip;
    }
    let data = tail_at(line, offset);
    if !state.video_playback_errors.insert(data.to_string()) {
        return Outcome::Consumed;
    }
    message(format!("VideoError: {data}"))
}
