//! Core types for Sable

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One selectable encoded variant of a stream.
///
/// Equality, hashing and ordering are structural over bitrate, resolution and
/// codecs; the display name does not take part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quality {
    /// Display name, e.g. "720p60"
    pub name: String,
    /// Codec string for all tracks, e.g. "avc1.64002A,mp4a.40.2"
    pub codecs: String,
    /// Bitrate in bits per second
    pub bitrate: u64,
    /// Video width, 0 if unknown or audio-only
    pub width: u32,
    /// Video height, 0 if unknown or audio-only
    pub height: u32,
}

impl Quality {
    pub fn new(
        name: impl Into<String>,
        codecs: impl Into<String>,
        bitrate: u64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            name: name.into(),
            codecs: codecs.into(),
            bitrate,
            width,
            height,
        }
    }

    /// True when the quality fits inside a width/height box.
    /// Unknown dimensions always fit.
    pub fn fits_within(&self, max_width: u32, max_height: u32) -> bool {
        (self.width == 0 || self.width <= max_width) && (self.height == 0 || self.height <= max_height)
    }

    /// Label for logs, falls back to the resolution tier when unnamed
    pub fn label(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.height {
            0 => format!("{}bps", self.bitrate),
            1..=240 => "240p".to_string(),
            241..=360 => "360p".to_string(),
            361..=480 => "480p".to_string(),
            481..=720 => "720p".to_string(),
            721..=1080 => "1080p".to_string(),
            1081..=1440 => "1440p".to_string(),
            _ => "4K".to_string(),
        }
    }

    fn key(&self) -> (u64, u32, u32, &str) {
        (self.bitrate, self.width, self.height, self.codecs.as_str())
    }
}

impl PartialEq for Quality {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Quality {}

impl Hash for Quality {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quality {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}x{} @ {}bps)", self.label(), self.width, self.height, self.bitrate)
    }
}

/// A contiguous range of playable media, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BufferRange {
    pub start: f64,
    pub end: f64,
}

impl BufferRange {
    pub const EMPTY: BufferRange = BufferRange { start: 0.0, end: 0.0 };

    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Closed containment: the end point counts as covered
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }
}

/// Player state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    /// Initial state, unloaded, paused or recovered from an error
    Idle,
    /// Source loaded and initial buffer satisfied
    Ready,
    /// Waiting for media
    Buffering,
    /// Content is playing
    Playing,
    /// End of on-demand content reached
    Ended,
}

impl PlayerState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlayerState) -> bool {
        use PlayerState::*;
        matches!(
            (self, target),
            // Fatal errors, pause and teardown
            (_, Idle) |
            // From Idle (loaded source, paused)
            (Idle, Ready) | (Idle, Buffering) | (Idle, Playing) | (Idle, Ended) |
            // From Ready
            (Ready, Buffering) | (Ready, Playing) |
            // From Buffering
            (Buffering, Playing) | (Buffering, Ended) |
            // From Playing
            (Playing, Buffering) | (Playing, Ended) |
            // From Ended
            (Ended, Buffering) | (Ended, Playing)
        ) && *self != target
    }

    /// Wire name used for state events
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "Idle",
            PlayerState::Ready => "Ready",
            PlayerState::Buffering => "Buffering",
            PlayerState::Playing => "Playing",
            PlayerState::Ended => "Ended",
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caption or subtitle cue delivered with the stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextCue {
    pub start_time: f64,
    pub end_time: f64,
    /// Line on which the text belongs
    pub line: f64,
    /// Cue size as a percentage of the video
    pub size: f64,
    /// Text position as a fraction of the cue box
    pub position: f64,
    pub text: String,
}

/// Timed text metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMetadataCue {
    pub start_time: f64,
    pub end_time: f64,
    pub description: String,
    pub text: String,
    /// Either in-band or out-of-band origin
    pub owner: String,
}

/// ID3 frames carried by the stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Id3Cue {
    pub start_time: f64,
    pub end_time: f64,
    pub frames: BTreeMap<String, String>,
}

/// Any timed cue the engine can deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Cue {
    #[serde(rename = "TextCue")]
    Text(TextCue),
    #[serde(rename = "TextMetadataCue")]
    Metadata(TextMetadataCue),
    #[serde(rename = "Id3Cue")]
    Id3(Id3Cue),
}

impl Cue {
    pub fn start_time(&self) -> f64 {
        match self {
            Cue::Text(c) => c.start_time,
            Cue::Metadata(c) => c.start_time,
            Cue::Id3(c) => c.start_time,
        }
    }

    pub fn end_time(&self) -> f64 {
        match self {
            Cue::Text(c) => c.end_time,
            Cue::Metadata(c) => c.end_time,
            Cue::Id3(c) => c.end_time,
        }
    }
}

/// Log levels accepted by the player surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// True if events at `level` pass this threshold
    pub fn enables(&self, level: tracing::Level) -> bool {
        level <= self.as_tracing_level()
    }

    /// Directive for an env-filter, e.g. "sable_core=debug"
    pub fn directive(&self) -> String {
        format!("sable_core={}", self.as_str())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(crate::Error::InvalidParameter(format!("log level {other}"))),
        }
    }
}
