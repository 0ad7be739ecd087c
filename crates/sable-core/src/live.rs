//! Live edge controller
//!
//! Tracks the sliding window of a live stream, the negotiated low-latency
//! mode and the rebuffer-to-live skip.

use crate::config::LiveConfig;
use std::time::Duration;
use tracing::{debug, info};

/// Window of a live stream as last reported by the manifest
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveWindow {
    /// Start of the oldest segment still listed
    pub start: f64,
    /// End of the newest segment
    pub edge: f64,
    /// Target segment duration
    pub target_duration: f64,
}

/// Live timing state for one player.
///
/// Preferences (low-latency, rebuffer-to-live) survive loads; the window and
/// the pending skip are stream-scoped.
#[derive(Debug, Clone)]
pub struct LiveEdgeController {
    config: LiveConfig,
    low_latency_enabled: bool,
    rebuffer_to_live: bool,
    window: Option<LiveWindow>,
    source_low_latency: bool,
    pending_skip: bool,
}

impl LiveEdgeController {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            low_latency_enabled: config.low_latency_enabled,
            rebuffer_to_live: config.rebuffer_to_live,
            config,
            window: None,
            source_low_latency: false,
            pending_skip: false,
        }
    }

    /// Start tracking a live stream
    pub fn begin(&mut self, window: LiveWindow, source_low_latency: bool) {
        self.window = Some(window);
        self.source_low_latency = source_low_latency;
        self.pending_skip = false;
        info!(
            window_start = window.start,
            live_edge = window.edge,
            low_latency = self.is_low_latency(),
            "Live session started"
        );
    }

    /// Apply a refreshed window; the edge never moves backwards
    pub fn update_window(&mut self, window: LiveWindow) {
        if let Some(current) = self.window.as_mut() {
            current.start = window.start.max(current.start);
            current.edge = window.edge.max(current.edge);
            current.target_duration = window.target_duration;
            debug!(start = current.start, edge = current.edge, "Live window updated");
        }
    }

    /// Drop stream-scoped state
    pub fn reset(&mut self) {
        self.window = None;
        self.source_low_latency = false;
        self.pending_skip = false;
    }

    pub fn is_live(&self) -> bool {
        self.window.is_some()
    }

    pub fn window(&self) -> Option<LiveWindow> {
        self.window
    }

    /// Low-latency is on when the stream offers it and the preference allows
    pub fn is_low_latency(&self) -> bool {
        self.is_live() && self.source_low_latency && self.low_latency_enabled
    }

    pub fn low_latency_enabled(&self) -> bool {
        self.low_latency_enabled
    }

    /// Change the low-latency preference.
    ///
    /// Returns true when the negotiated mode of an active live session flips
    /// and the live point has to be reloaded.
    pub fn set_low_latency_enabled(&mut self, enabled: bool) -> bool {
        let before = self.is_low_latency();
        self.low_latency_enabled = enabled;
        let flipped = self.is_live() && self.source_low_latency && before != self.is_low_latency();
        if flipped {
            info!(enabled, "Low-latency mode changed, reloading live point");
        }
        flipped
    }

    pub fn rebuffer_to_live(&self) -> bool {
        self.rebuffer_to_live
    }

    pub fn set_rebuffer_to_live(&mut self, enabled: bool) {
        self.rebuffer_to_live = enabled;
        if !enabled {
            self.pending_skip = false;
        }
    }

    pub fn live_edge(&self) -> Option<f64> {
        self.window.map(|w| w.edge)
    }

    /// Distance kept behind the edge
    pub fn target_latency(&self) -> f64 {
        let Some(window) = self.window else {
            return 0.0;
        };
        let hold_back = if self.is_low_latency() {
            self.config.low_latency_hold_back_segments
        } else {
            self.config.hold_back_segments
        };
        hold_back * window.target_duration
    }

    /// Where live playback starts and where a rebuffer-to-live skip lands
    pub fn live_point(&self) -> Option<f64> {
        self.window
            .map(|w| (w.edge - self.target_latency()).max(w.start))
    }

    /// `live_edge - position`, zero for on-demand
    pub fn latency(&self, position: f64) -> f64 {
        self.window
            .map(|w| (w.edge - position).max(0.0))
            .unwrap_or(0.0)
    }

    /// Clamp a seek target into the live window
    pub fn clamp(&self, time: f64) -> f64 {
        match self.window {
            Some(w) => time.clamp(w.start, w.edge.max(w.start)),
            None => time,
        }
    }

    /// Manifest refresh period while live
    pub fn refresh_interval(&self) -> Option<Duration> {
        let window = self.window?;
        let secs = if self.is_low_latency() {
            window.target_duration / 2.0
        } else {
            window.target_duration
        };
        if secs <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs).ok()
    }

    /// Note a rebuffer. Returns true if recovery should jump to the live point.
    pub fn on_rebuffer(&mut self) -> bool {
        if self.is_live() && self.rebuffer_to_live {
            self.pending_skip = true;
            debug!("Rebuffer-to-live skip armed");
        }
        self.pending_skip
    }

    pub fn skip_pending(&self) -> bool {
        self.pending_skip
    }

    /// Consume the pending skip, returning the live point to jump to
    pub fn take_skip(&mut self) -> Option<f64> {
        if !std::mem::take(&mut self.pending_skip) {
            return None;
        }
        self.live_point()
    }

    pub fn cancel_skip(&mut self) {
        self.pending_skip = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: f64, edge: f64) -> LiveWindow {
        LiveWindow {
            start,
            edge,
            target_duration: 2.0,
        }
    }

    #[test]
    fn test_on_demand_has_no_live_metrics() {
        let live = LiveEdgeController::new(LiveConfig::default());
        assert!(!live.is_live());
        assert_eq!(live.live_point(), None);
        assert_eq!(live.latency(10.0), 0.0);
        assert_eq!(live.clamp(-3.0), -3.0);
        assert_eq!(live.refresh_interval(), None);
    }

    #[test]
    fn test_live_point_and_latency() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.begin(window(100.0, 130.0), false);

        assert_eq!(live.target_latency(), 6.0);
        assert_eq!(live.live_point(), Some(124.0));
        assert_eq!(live.latency(124.0), 6.0);
        assert_eq!(live.clamp(10.0), 100.0);
        assert_eq!(live.clamp(500.0), 130.0);
    }

    #[test]
    fn test_live_point_never_before_window() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.begin(window(0.0, 4.0), false);
        assert_eq!(live.live_point(), Some(0.0));
    }

    #[test]
    fn test_low_latency_negotiation() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.begin(window(0.0, 30.0), true);
        assert!(live.is_low_latency());
        assert_eq!(live.target_latency(), 2.0);
        assert_eq!(live.refresh_interval(), Some(Duration::from_secs(1)));

        assert!(live.set_low_latency_enabled(false));
        assert!(!live.is_low_latency());
        assert!(!live.set_low_latency_enabled(false));

        live.begin(window(0.0, 30.0), false);
        assert!(!live.set_low_latency_enabled(true));
        assert!(!live.is_low_latency());
    }

    #[test]
    fn test_refresh_interval_out_of_range() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        for target_duration in [0.0, 1e30, f64::INFINITY, f64::NAN] {
            live.begin(
                LiveWindow {
                    target_duration,
                    ..window(0.0, 30.0)
                },
                false,
            );
            assert_eq!(live.refresh_interval(), None, "{target_duration}");
        }
    }

    #[test]
    fn test_window_edge_is_monotonic() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.begin(window(0.0, 30.0), false);
        live.update_window(window(2.0, 28.0));
        assert_eq!(live.live_edge(), Some(30.0));
        live.update_window(window(4.0, 34.0));
        assert_eq!(live.window(), Some(window(4.0, 34.0)));
    }

    #[test]
    fn test_rebuffer_skip() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.begin(window(0.0, 30.0), false);
        assert!(!live.on_rebuffer());

        live.set_rebuffer_to_live(true);
        assert!(live.on_rebuffer());
        live.update_window(window(0.0, 40.0));
        assert_eq!(live.take_skip(), Some(34.0));
        assert_eq!(live.take_skip(), None);
    }

    #[test]
    fn test_reset_keeps_preferences() {
        let mut live = LiveEdgeController::new(LiveConfig::default());
        live.set_rebuffer_to_live(true);
        live.set_low_latency_enabled(false);
        live.begin(window(0.0, 30.0), true);
        live.reset();
        assert!(!live.is_live());
        assert!(live.rebuffer_to_live());
        assert!(!live.low_latency_enabled());
    }
}
