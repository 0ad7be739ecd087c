//! Capability traits implemented by [`Player`]
//!
//! Grouped so that code needing one concern (a buffer bar, a quality menu, a
//! live badge) can depend on just that trait.

use crate::engine::Command;
use crate::player::{known_quality, Player};
use crate::types::{BufferRange, Quality};
use crate::Result;

/// Buffered media around the playhead
pub trait BufferQuery {
    /// Range containing the playhead, empty when none does
    fn buffered(&self) -> BufferRange;

    /// Every buffered range, sorted and disjoint
    fn buffered_ranges(&self) -> Vec<BufferRange>;

    /// Seconds buffered ahead of the playhead
    fn buffer_duration(&self) -> f64;
}

/// Quality selection
pub trait QualityControl {
    /// Playable qualities, lowest bitrate first
    fn qualities(&self) -> Vec<Quality>;

    /// Quality being played
    fn quality(&self) -> Option<Quality>;

    /// Pin `quality`. With `adaptive` the switch happens once media at the new
    /// quality reaches the playhead, otherwise immediately.
    ///
    /// Fails with [`Error::InvalidParameter`](crate::Error::InvalidParameter)
    /// for a quality the current source does not offer.
    fn set_quality(&self, quality: &Quality, adaptive: bool) -> Result<()>;

    fn is_auto_quality_mode(&self) -> bool;

    /// Enable ABR, or pin the current quality
    fn set_auto_quality_mode(&self, enabled: bool);

    /// Cap ABR at the bitrate of `quality`
    fn set_auto_max_quality(&self, quality: &Quality);

    /// Cap ABR in bits per second; zero removes the cap
    fn set_auto_max_bitrate(&self, bitrate: u64);

    /// Cap ABR by resolution; zero removes a dimension's cap
    fn set_auto_max_video_size(&self, width: u32, height: u32);

    fn auto_max_bitrate(&self) -> Option<u64>;
}

/// Live stream controls
pub trait LiveControl {
    /// Low-latency delivery is active for the current stream
    fn is_live_low_latency(&self) -> bool;

    fn is_live_low_latency_enabled(&self) -> bool;

    /// Flipping the negotiated mode of a running live stream reloads it
    fn set_live_low_latency_enabled(&self, enabled: bool);

    fn rebuffer_to_live(&self) -> bool;

    /// After a rebuffer, resume at the live point instead of where playback
    /// stalled
    fn set_rebuffer_to_live(&self, enabled: bool);

    /// Seconds behind the live edge, zero for on-demand
    fn live_latency(&self) -> f64;
}

impl BufferQuery for Player {
    fn buffered(&self) -> BufferRange {
        self.read(|s| s.buffered_range)
    }

    fn buffered_ranges(&self) -> Vec<BufferRange> {
        self.read(|s| s.buffered.clone())
    }

    fn buffer_duration(&self) -> f64 {
        self.read(|s| s.buffer_duration)
    }
}

impl QualityControl for Player {
    fn qualities(&self) -> Vec<Quality> {
        self.read(|s| s.qualities.clone())
    }

    fn quality(&self) -> Option<Quality> {
        self.read(|s| s.quality.clone())
    }

    fn set_quality(&self, quality: &Quality, adaptive: bool) -> Result<()> {
        self.read(|s| known_quality(s, quality))?;
        self.send(Command::SetQuality {
            quality: quality.clone(),
            adaptive,
        });
        Ok(())
    }

    fn is_auto_quality_mode(&self) -> bool {
        self.read(|s| s.auto_quality)
    }

    fn set_auto_quality_mode(&self, enabled: bool) {
        self.send(Command::SetAutoQualityMode(enabled));
    }

    fn set_auto_max_quality(&self, quality: &Quality) {
        self.send(Command::SetAutoMaxQuality(quality.clone()));
    }

    fn set_auto_max_bitrate(&self, bitrate: u64) {
        self.send(Command::SetAutoMaxBitrate(Some(bitrate)));
    }

    fn set_auto_max_video_size(&self, width: u32, height: u32) {
        self.send(Command::SetAutoMaxVideoSize {
            width: Some(width),
            height: Some(height),
        });
    }

    fn auto_max_bitrate(&self) -> Option<u64> {
        self.read(|s| s.constraints.max_bitrate)
    }
}

impl LiveControl for Player {
    fn is_live_low_latency(&self) -> bool {
        self.read(|s| s.low_latency)
    }

    fn is_live_low_latency_enabled(&self) -> bool {
        self.read(|s| s.low_latency_enabled)
    }

    fn set_live_low_latency_enabled(&self, enabled: bool) {
        self.send(Command::SetLiveLowLatencyEnabled(enabled));
    }

    fn rebuffer_to_live(&self) -> bool {
        self.read(|s| s.rebuffer_to_live)
    }

    fn set_rebuffer_to_live(&self, enabled: bool) {
        self.send(Command::SetRebufferToLive(enabled));
    }

    fn live_latency(&self) -> f64 {
        self.read(|s| s.live_latency)
    }
}
