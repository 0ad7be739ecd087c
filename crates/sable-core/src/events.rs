//! Player events
//!
//! Events are grouped by category the way listeners consume them: state
//! changes, playback events and stream metadata. Every event has a wire name
//! from the closed [`EventName`] set.

use crate::error::PlayerError;
use crate::types::{Cue, Id3Cue, PlayerState, Quality, TextCue, TextMetadataCue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::warn;

/// Closed set of event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    // State
    Idle,
    Ready,
    Buffering,
    Playing,
    Ended,
    // Playback
    #[serde(rename = "PlayerInitialized")]
    Initialized,
    #[serde(rename = "PlayerQualityChanged")]
    QualityChanged,
    #[serde(rename = "PlayerDurationChanged")]
    DurationChanged,
    #[serde(rename = "PlayerVolumeChanged")]
    VolumeChanged,
    #[serde(rename = "PlayerMutedChanged")]
    MutedChanged,
    #[serde(rename = "PlayerPlaybackRateChanged")]
    PlaybackRateChanged,
    #[serde(rename = "PlayerRebuffering")]
    Rebuffering,
    #[serde(rename = "PlayerAudioBlocked")]
    AudioBlocked,
    #[serde(rename = "PlayerPlaybackBlocked")]
    PlaybackBlocked,
    #[serde(rename = "PlayerError")]
    Error,
    #[serde(rename = "PlayerTimeUpdate")]
    TimeUpdate,
    #[serde(rename = "PlayerBufferUpdate")]
    BufferUpdate,
    #[serde(rename = "PlayerSeekCompleted")]
    SeekCompleted,
    #[serde(rename = "PlayerTextCue")]
    TextCue,
    #[serde(rename = "PlayerTextMetadataCue")]
    TextMetadataCue,
    #[serde(rename = "PlayerNetworkUnavailable")]
    NetworkUnavailable,
    // Metadata
    #[serde(rename = "MetaID3")]
    Id3,
}

impl EventName {
    pub const ALL: [EventName; 22] = [
        EventName::Idle,
        EventName::Ready,
        EventName::Buffering,
        EventName::Playing,
        EventName::Ended,
        EventName::Initialized,
        EventName::QualityChanged,
        EventName::DurationChanged,
        EventName::VolumeChanged,
        EventName::MutedChanged,
        EventName::PlaybackRateChanged,
        EventName::Rebuffering,
        EventName::AudioBlocked,
        EventName::PlaybackBlocked,
        EventName::Error,
        EventName::TimeUpdate,
        EventName::BufferUpdate,
        EventName::SeekCompleted,
        EventName::TextCue,
        EventName::TextMetadataCue,
        EventName::NetworkUnavailable,
        EventName::Id3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Idle => "Idle",
            EventName::Ready => "Ready",
            EventName::Buffering => "Buffering",
            EventName::Playing => "Playing",
            EventName::Ended => "Ended",
            EventName::Initialized => "PlayerInitialized",
            EventName::QualityChanged => "PlayerQualityChanged",
            EventName::DurationChanged => "PlayerDurationChanged",
            EventName::VolumeChanged => "PlayerVolumeChanged",
            EventName::MutedChanged => "PlayerMutedChanged",
            EventName::PlaybackRateChanged => "PlayerPlaybackRateChanged",
            EventName::Rebuffering => "PlayerRebuffering",
            EventName::AudioBlocked => "PlayerAudioBlocked",
            EventName::PlaybackBlocked => "PlayerPlaybackBlocked",
            EventName::Error => "PlayerError",
            EventName::TimeUpdate => "PlayerTimeUpdate",
            EventName::BufferUpdate => "PlayerBufferUpdate",
            EventName::SeekCompleted => "PlayerSeekCompleted",
            EventName::TextCue => "PlayerTextCue",
            EventName::TextMetadataCue => "PlayerTextMetadataCue",
            EventName::NetworkUnavailable => "PlayerNetworkUnavailable",
            EventName::Id3 => "MetaID3",
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(
            self,
            EventName::Idle
                | EventName::Ready
                | EventName::Buffering
                | EventName::Playing
                | EventName::Ended
        )
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidParameter(format!("event name {s}")))
    }
}

/// General playback events
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Player created
    Initialized,
    QualityChanged(Quality),
    /// Seconds, infinite for live
    DurationChanged(f64),
    VolumeChanged(f64),
    MutedChanged(bool),
    PlaybackRateChanged(f64),
    /// Buffering after playback had started
    Rebuffering,
    /// Unmuted playback was blocked; the player muted itself
    AudioBlocked,
    /// Playback was blocked; the player paused
    PlaybackBlocked,
    Error(PlayerError),
    TimeUpdate(f64),
    BufferUpdate,
    SeekCompleted(f64),
    TextCue(TextCue),
    TextMetadataCue(TextMetadataCue),
    NetworkUnavailable,
}

impl PlaybackEvent {
    pub fn name(&self) -> EventName {
        match self {
            PlaybackEvent::Initialized => EventName::Initialized,
            PlaybackEvent::QualityChanged(_) => EventName::QualityChanged,
            PlaybackEvent::DurationChanged(_) => EventName::DurationChanged,
            PlaybackEvent::VolumeChanged(_) => EventName::VolumeChanged,
            PlaybackEvent::MutedChanged(_) => EventName::MutedChanged,
            PlaybackEvent::PlaybackRateChanged(_) => EventName::PlaybackRateChanged,
            PlaybackEvent::Rebuffering => EventName::Rebuffering,
            PlaybackEvent::AudioBlocked => EventName::AudioBlocked,
            PlaybackEvent::PlaybackBlocked => EventName::PlaybackBlocked,
            PlaybackEvent::Error(_) => EventName::Error,
            PlaybackEvent::TimeUpdate(_) => EventName::TimeUpdate,
            PlaybackEvent::BufferUpdate => EventName::BufferUpdate,
            PlaybackEvent::SeekCompleted(_) => EventName::SeekCompleted,
            PlaybackEvent::TextCue(_) => EventName::TextCue,
            PlaybackEvent::TextMetadataCue(_) => EventName::TextMetadataCue,
            PlaybackEvent::NetworkUnavailable => EventName::NetworkUnavailable,
        }
    }

    fn payload(&self) -> Value {
        match self {
            PlaybackEvent::QualityChanged(q) => to_value(q),
            PlaybackEvent::DurationChanged(d) => number(*d),
            PlaybackEvent::VolumeChanged(v) => json!(v),
            PlaybackEvent::MutedChanged(m) => json!(m),
            PlaybackEvent::PlaybackRateChanged(r) => json!(r),
            PlaybackEvent::Error(e) => to_value(e),
            PlaybackEvent::TimeUpdate(t) => number(*t),
            PlaybackEvent::SeekCompleted(t) => number(*t),
            PlaybackEvent::TextCue(c) => to_value(c),
            PlaybackEvent::TextMetadataCue(c) => to_value(c),
            PlaybackEvent::Initialized
            | PlaybackEvent::Rebuffering
            | PlaybackEvent::AudioBlocked
            | PlaybackEvent::PlaybackBlocked
            | PlaybackEvent::BufferUpdate
            | PlaybackEvent::NetworkUnavailable => Value::Null,
        }
    }
}

/// Stream metadata events
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    Id3(Id3Cue),
}

impl MetadataEvent {
    pub fn name(&self) -> EventName {
        match self {
            MetadataEvent::Id3(_) => EventName::Id3,
        }
    }
}

/// Any event emitted by a player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    State(PlayerState),
    Playback(PlaybackEvent),
    Metadata(MetadataEvent),
}

impl PlayerEvent {
    pub fn name(&self) -> EventName {
        match self {
            PlayerEvent::State(state) => match state {
                PlayerState::Idle => EventName::Idle,
                PlayerState::Ready => EventName::Ready,
                PlayerState::Buffering => EventName::Buffering,
                PlayerState::Playing => EventName::Playing,
                PlayerState::Ended => EventName::Ended,
            },
            PlayerEvent::Playback(event) => event.name(),
            PlayerEvent::Metadata(event) => event.name(),
        }
    }

    /// `{"name": ..., "payload": ...}` as printed by the CLI
    pub fn to_json(&self) -> Value {
        let payload = match self {
            PlayerEvent::State(_) => Value::Null,
            PlayerEvent::Playback(event) => event.payload(),
            PlayerEvent::Metadata(MetadataEvent::Id3(cue)) => to_value(cue),
        };
        json!({ "name": self.name(), "payload": payload })
    }

    /// Wrap a cue delivered by the timeline
    pub fn from_cue(cue: Cue) -> Self {
        match cue {
            Cue::Text(c) => PlaybackEvent::TextCue(c).into(),
            Cue::Metadata(c) => PlaybackEvent::TextMetadataCue(c).into(),
            Cue::Id3(c) => MetadataEvent::Id3(c).into(),
        }
    }
}

impl From<PlayerState> for PlayerEvent {
    fn from(state: PlayerState) -> Self {
        Self::State(state)
    }
}

impl From<PlaybackEvent> for PlayerEvent {
    fn from(event: PlaybackEvent) -> Self {
        Self::Playback(event)
    }
}

impl From<MetadataEvent> for PlayerEvent {
    fn from(event: MetadataEvent) -> Self {
        Self::Metadata(event)
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// JSON has no infinity; live durations go out as null
fn number(value: f64) -> Value {
    if value.is_finite() {
        json!(value)
    } else {
        Value::Null
    }
}

/// Broadcast channel carrying one player's events.
///
/// Publishing never blocks; with no subscribers events are dropped. Once every
/// clone is dropped, subscribers observe the end of the stream.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish<E: Into<PlayerEvent>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to a subset of event names
    pub fn subscribe_to(&self, names: impl IntoIterator<Item = EventName>) -> EventSubscription {
        EventSubscription::filtered(self.tx.subscribe(), names)
    }
}

/// Receiver that skips events outside its name set
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<PlayerEvent>,
    names: Option<HashSet<EventName>>,
}

impl EventSubscription {
    /// Wrap `rx`, keeping only events named in `names`
    pub fn filtered(
        rx: broadcast::Receiver<PlayerEvent>,
        names: impl IntoIterator<Item = EventName>,
    ) -> Self {
        Self {
            rx,
            names: Some(names.into_iter().collect()),
        }
    }

    /// Next matching event, `None` once the player is gone.
    /// Lagging receivers skip what they missed.
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &PlayerEvent) -> bool {
        self.names
            .as_ref()
            .map_or(true, |names| names.contains(&event.name()))
    }
}

impl From<broadcast::Receiver<PlayerEvent>> for EventSubscription {
    fn from(rx: broadcast::Receiver<PlayerEvent>) -> Self {
        Self { rx, names: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use rstest::rstest;

    #[rstest]
    #[case(PlayerEvent::State(PlayerState::Playing), "Playing")]
    #[case(PlaybackEvent::QualityChanged(Quality::default()).into(), "PlayerQualityChanged")]
    #[case(PlaybackEvent::SeekCompleted(3.0).into(), "PlayerSeekCompleted")]
    #[case(MetadataEvent::Id3(Id3Cue::default()).into(), "MetaID3")]
    fn test_event_names(#[case] event: PlayerEvent, #[case] expected: &str) {
        assert_eq!(event.name().as_str(), expected);
        assert_eq!(serde_json::to_value(event.name()).unwrap(), expected);
    }

    #[test]
    fn test_name_parse_round_trip() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), name);
        }
        assert!("PlayerExploded".parse::<EventName>().is_err());
    }

    #[test]
    fn test_to_json_payloads() {
        let event: PlayerEvent = PlaybackEvent::Error(PlayerError {
            source: "MasterPlaylist".into(),
            error_type: ErrorType::Network,
            code: 500,
            message: "boom".into(),
        })
        .into();
        let json = event.to_json();
        assert_eq!(json["name"], "PlayerError");
        assert_eq!(json["payload"]["type"], "ErrorNetwork");

        let live: PlayerEvent = PlaybackEvent::DurationChanged(f64::INFINITY).into();
        assert!(live.to_json()["payload"].is_null());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(PlaybackEvent::Initialized);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_to([EventName::SeekCompleted]);
        bus.publish(PlaybackEvent::TimeUpdate(1.0));
        bus.publish(PlaybackEvent::SeekCompleted(4.0));
        assert_eq!(
            sub.recv().await,
            Some(PlayerEvent::Playback(PlaybackEvent::SeekCompleted(4.0)))
        );
    }

    #[tokio::test]
    async fn test_subscription_ends_when_bus_dropped() {
        let bus = EventBus::new(16);
        let mut sub: EventSubscription = bus.subscribe().into();
        bus.publish(PlayerState::Ready);
        drop(bus);
        assert_eq!(sub.recv().await, Some(PlayerEvent::State(PlayerState::Ready)));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut sub: EventSubscription = bus.subscribe().into();
        for i in 0..10 {
            bus.publish(PlaybackEvent::TimeUpdate(i as f64));
        }
        assert_eq!(
            sub.recv().await,
            Some(PlayerEvent::Playback(PlaybackEvent::TimeUpdate(8.0)))
        );
    }
}
