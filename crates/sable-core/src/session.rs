//! Playback session state
//!
//! [`Preferences`] and [`PendingIntent`] belong to the player and survive
//! loads. [`PlaybackSession`] is created by a load and discarded whole on the
//! next load, a fatal error or teardown.

use crate::config::{PlayerConfig, INITIAL_BUFFER_RANGE, PLAYBACK_RATE_RANGE, VOLUME_RANGE};
use crate::manifest::MediaType;
use crate::types::{LogLevel, Quality, SessionId};
use tracing::debug;
use url::Url;

/// Player-level settings that survive loads
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub autoplay: bool,
    pub initial_buffer_duration: f64,
    pub log_level: LogLevel,
}

impl Preferences {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            volume: config.volume,
            muted: config.muted,
            playback_rate: 1.0,
            autoplay: config.autoplay,
            initial_buffer_duration: config.initial_buffer_duration,
            log_level: config.log_level,
        }
    }

    /// Returns true if the volume changed. Out-of-range values are ignored.
    pub fn set_volume(&mut self, volume: f64) -> bool {
        if !VOLUME_RANGE.contains(&volume) {
            debug!(volume, "Ignoring out-of-range volume");
            return false;
        }
        replace(&mut self.volume, volume)
    }

    pub fn set_muted(&mut self, muted: bool) -> bool {
        replace(&mut self.muted, muted)
    }

    /// Returns true if the rate changed. Out-of-range values are ignored.
    pub fn set_playback_rate(&mut self, rate: f64) -> bool {
        if !PLAYBACK_RATE_RANGE.contains(&rate) {
            debug!(rate, "Ignoring out-of-range playback rate");
            return false;
        }
        replace(&mut self.playback_rate, rate)
    }

    /// Returns true if accepted. Out-of-range values keep the previous one.
    pub fn set_initial_buffer_duration(&mut self, seconds: f64) -> bool {
        if !INITIAL_BUFFER_RANGE.contains(&seconds) {
            debug!(seconds, "Ignoring out-of-range initial buffer duration");
            return false;
        }
        self.initial_buffer_duration = seconds;
        true
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// User intent recorded before it can be applied
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingIntent {
    /// The user wants playback running
    pub play: bool,
    /// Seek requested before the source was known
    pub seek: Option<f64>,
}

/// Where the session's media comes from
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub path: String,
    pub url: Url,
    pub media_type: MediaType,
    /// Explicit type given to `load`, kept for internal reloads
    pub explicit_type: Option<String>,
}

/// Adaptive pin waiting for the playhead to reach the new quality
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSwitch {
    pub quality: Quality,
    /// Start of the first appended segment at the new quality
    pub at: Option<f64>,
}

/// State of one loaded source
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub source: SourceInfo,
    /// Assigned once the session reaches READY
    pub id: Option<SessionId>,
    /// Seconds, infinite for live
    pub duration: f64,
    pub position: f64,
    /// Manifest received and catalog built
    pub loaded: bool,
    /// READY was reached
    pub ready: bool,
    /// PLAYING was reached since READY
    pub started: bool,
    /// Paused by the user
    pub paused: bool,
    /// Quality being played
    pub current_quality: Option<Quality>,
    /// Quality being fetched
    pub selected_quality: Option<Quality>,
    pub pending_switch: Option<PendingSwitch>,
    /// Seek waiting for coverage
    pub seeking: Option<f64>,
}

impl PlaybackSession {
    pub fn new(source: SourceInfo) -> Self {
        Self {
            source,
            id: None,
            duration: 0.0,
            position: 0.0,
            loaded: false,
            ready: false,
            started: false,
            paused: false,
            current_quality: None,
            selected_quality: None,
            pending_switch: None,
            seeking: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.duration.is_infinite()
    }

    /// Mark READY and assign the session id
    pub fn mark_ready(&mut self) -> SessionId {
        self.ready = true;
        *self.id.get_or_insert_with(SessionId::new)
    }

    /// Playhead reached the end of on-demand content
    pub fn at_end(&self, epsilon: f64) -> bool {
        !self.is_live() && self.duration > 0.0 && self.position >= self.duration - epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn source() -> SourceInfo {
        SourceInfo {
            path: "memory://vod".into(),
            url: Url::parse("memory://vod").unwrap(),
            media_type: MediaType::Hls,
            explicit_type: None,
        }
    }

    #[rstest]
    #[case(0.5, true, 0.5)]
    #[case(1.0, false, 1.0)]
    #[case(1.5, false, 1.0)]
    #[case(-0.1, false, 1.0)]
    fn test_set_volume(#[case] input: f64, #[case] changed: bool, #[case] expected: f64) {
        let mut prefs = Preferences::from_config(&PlayerConfig::default());
        assert_eq!(prefs.set_volume(input), changed);
        assert_eq!(prefs.volume, expected);
    }

    #[rstest]
    #[case(0.25, true)]
    #[case(2.0, true)]
    #[case(0.1, false)]
    #[case(4.0, false)]
    fn test_set_playback_rate(#[case] rate: f64, #[case] accepted: bool) {
        let mut prefs = Preferences::from_config(&PlayerConfig::default());
        assert_eq!(prefs.set_playback_rate(rate), accepted);
    }

    #[test]
    fn test_initial_buffer_duration_range() {
        let mut prefs = Preferences::from_config(&PlayerConfig::default());
        assert!(prefs.set_initial_buffer_duration(0.1));
        assert!(!prefs.set_initial_buffer_duration(5.5));
        assert_eq!(prefs.initial_buffer_duration, 0.1);
    }

    #[test]
    fn test_muted_change_detection() {
        let mut prefs = Preferences::from_config(&PlayerConfig::default());
        assert!(!prefs.set_muted(false));
        assert!(prefs.set_muted(true));
    }

    #[test]
    fn test_session_id_assigned_once() {
        let mut session = PlaybackSession::new(source());
        assert!(session.id.is_none());
        let id = session.mark_ready();
        assert_eq!(session.mark_ready(), id);
    }

    #[test]
    fn test_at_end() {
        let mut session = PlaybackSession::new(source());
        session.duration = 100.0;
        session.position = 99.99;
        assert!(session.at_end(0.05));
        session.duration = f64::INFINITY;
        assert!(!session.at_end(0.05));
    }
}
