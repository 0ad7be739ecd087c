//! Player configuration

use crate::types::LogLevel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Accepted volume range
pub const VOLUME_RANGE: RangeInclusive<f64> = 0.0..=1.0;
/// Accepted playback rate range
pub const PLAYBACK_RATE_RANGE: RangeInclusive<f64> = 0.25..=2.0;
/// Accepted initial buffer duration range (seconds)
pub const INITIAL_BUFFER_RANGE: RangeInclusive<f64> = 0.1..=5.0;

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Buffer required before playback starts (seconds)
    pub initial_buffer_duration: f64,
    /// Initial buffer used when low-latency live is negotiated (seconds)
    pub low_latency_initial_buffer_duration: f64,
    /// Buffer required to resume after a rebuffer (seconds)
    pub rebuffer_threshold: f64,
    /// Stop fetching once this much media is buffered ahead (seconds)
    pub max_buffer_ahead: f64,
    /// Media retained behind the playhead (seconds)
    pub back_buffer: f64,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Internal clock period in milliseconds; `None` when the render layer reports time
    pub tick_interval_ms: Option<u64>,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Start playback automatically once ready
    pub autoplay: bool,
    /// Initial volume (0.0 to 1.0)
    pub volume: f64,
    /// Start muted
    pub muted: bool,
    /// Verbosity of this player's engine diagnostics
    pub log_level: LogLevel,
    /// ABR tuning
    pub abr: AbrConfig,
    /// Live tuning
    pub live: LiveConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            initial_buffer_duration: 2.0,
            low_latency_initial_buffer_duration: 1.0,
            rebuffer_threshold: 0.5,
            max_buffer_ahead: 30.0,
            back_buffer: 30.0,
            request_timeout_ms: 10_000,
            tick_interval_ms: Some(250),
            event_capacity: 256,
            autoplay: false,
            volume: 1.0,
            muted: false,
            log_level: LogLevel::Info,
            abr: AbrConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Configuration driven entirely by render-layer clock reports
    pub fn external_clock() -> Self {
        Self {
            tick_interval_ms: None,
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if !INITIAL_BUFFER_RANGE.contains(&self.initial_buffer_duration) {
            return Err(Error::InvalidConfig(format!(
                "initial_buffer_duration {} outside {:?}",
                self.initial_buffer_duration, INITIAL_BUFFER_RANGE
            )));
        }
        if !INITIAL_BUFFER_RANGE.contains(&self.low_latency_initial_buffer_duration) {
            return Err(Error::InvalidConfig(format!(
                "low_latency_initial_buffer_duration {} outside {:?}",
                self.low_latency_initial_buffer_duration, INITIAL_BUFFER_RANGE
            )));
        }
        if !(self.rebuffer_threshold > 0.0) {
            return Err(Error::InvalidConfig("rebuffer_threshold must be positive".into()));
        }
        if self.max_buffer_ahead < self.initial_buffer_duration {
            return Err(Error::InvalidConfig(
                "max_buffer_ahead must cover the initial buffer".into(),
            ));
        }
        if self.back_buffer < 0.0 {
            return Err(Error::InvalidConfig("back_buffer must not be negative".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("request_timeout_ms must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be positive".into()));
        }
        if !VOLUME_RANGE.contains(&self.volume) {
            return Err(Error::InvalidConfig(format!("volume {} outside [0, 1]", self.volume)));
        }
        self.abr.validate()?;
        self.live.validate()
    }
}

/// ABR tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbrConfig {
    /// Share of the throughput estimate the selection may spend (0.0-1.0)
    pub safety_factor: f64,
    /// Budget must exceed the target bitrate by this ratio to switch up
    pub up_hysteresis: f64,
    /// Buffer ahead required before switching up (seconds)
    pub min_buffer_for_up_switch: f64,
    /// Half-life of the fast estimator (seconds of download time)
    pub fast_half_life: f64,
    /// Half-life of the slow estimator (seconds of download time)
    pub slow_half_life: f64,
    /// Samples smaller than this are ignored (bytes)
    pub min_sample_bytes: u64,
    /// Estimate used before any sample arrives (bps); `None` starts at the lowest quality
    pub initial_bitrate_estimate: Option<u64>,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            safety_factor: 0.8,
            up_hysteresis: 1.2,
            min_buffer_for_up_switch: 4.0,
            fast_half_life: 2.0,
            slow_half_life: 10.0,
            min_sample_bytes: 16_000,
            initial_bitrate_estimate: None,
        }
    }
}

impl AbrConfig {
    fn validate(&self) -> Result<()> {
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(Error::InvalidConfig("abr.safety_factor must be in (0, 1]".into()));
        }
        if self.up_hysteresis < 1.0 {
            return Err(Error::InvalidConfig("abr.up_hysteresis must be >= 1".into()));
        }
        if !(self.fast_half_life > 0.0 && self.slow_half_life > 0.0) {
            return Err(Error::InvalidConfig("abr half-lives must be positive".into()));
        }
        Ok(())
    }
}

/// Live tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Request low-latency delivery when the source offers it
    pub low_latency_enabled: bool,
    /// Jump to the live point after a rebuffer
    pub rebuffer_to_live: bool,
    /// Target latency in target durations for regular live
    pub hold_back_segments: f64,
    /// Target latency in target durations for low-latency live
    pub low_latency_hold_back_segments: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            low_latency_enabled: true,
            rebuffer_to_live: false,
            hold_back_segments: 3.0,
            low_latency_hold_back_segments: 1.0,
        }
    }
}

impl LiveConfig {
    fn validate(&self) -> Result<()> {
        if !(self.hold_back_segments > 0.0 && self.low_latency_hold_back_segments > 0.0) {
            return Err(Error::InvalidConfig("live hold-back must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_config_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.initial_buffer_duration, 2.0);
        assert_eq!(config.low_latency_initial_buffer_duration, 1.0);
        assert_eq!(config.max_buffer_ahead, 30.0);
        assert!(config.live.low_latency_enabled);
        assert!(!config.live.rebuffer_to_live);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PlayerConfig =
            serde_json::from_str(r#"{"autoplay": true, "abr": {"safety_factor": 0.7}}"#).unwrap();
        assert!(config.autoplay);
        assert_eq!(config.abr.safety_factor, 0.7);
        assert_eq!(config.abr.up_hysteresis, 1.2);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PlayerConfig {
            initial_buffer_duration: 9.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = PlayerConfig {
            abr: AbrConfig {
                safety_factor: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_external_clock_has_no_tick() {
        assert_eq!(PlayerConfig::external_clock().tick_interval(), None);
        assert_eq!(
            PlayerConfig::default().tick_interval(),
            Some(Duration::from_millis(250))
        );
    }
}
