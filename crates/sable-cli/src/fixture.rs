//! Scripted sources for `simulate`

use sable_core::types::{Cue, Quality};
use sable_core::{FetchError, MemoryTransport};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Source description loaded from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub qualities: Vec<Quality>,
    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,
    /// Segments per quality; for live, the listed window
    #[serde(default = "default_segment_count")]
    pub segment_count: u64,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub low_latency: bool,
    /// Simulated link speed, unlimited when absent
    pub throughput_bps: Option<u64>,
    /// Live streams stop after this many seconds
    pub live_ends_after: Option<f64>,
    pub failure: Option<Failure>,
    #[serde(default)]
    pub cues: Vec<Cue>,
}

/// Injected request failure
#[derive(Debug, Clone, Deserialize)]
pub struct Failure {
    /// Segment to fail; the manifest when absent
    pub sequence: Option<u64>,
    /// HTTP status, or a timeout when absent
    pub status: Option<u16>,
}

fn default_segment_duration() -> f64 {
    2.0
}

fn default_segment_count() -> u64 {
    30
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading fixture {}: {e}", path.display()))?;
        let fixture: Fixture = serde_json::from_str(&text)?;
        if fixture.qualities.is_empty() {
            anyhow::bail!("fixture {} lists no qualities", path.display());
        }
        if fixture.segment_duration <= 0.0 {
            anyhow::bail!("segment_duration must be positive");
        }
        Ok(fixture)
    }

    pub fn transport(&self) -> MemoryTransport {
        let mut transport = if self.live {
            MemoryTransport::live(self.qualities.clone(), self.segment_duration, self.segment_count)
        } else {
            MemoryTransport::vod(self.qualities.clone(), self.segment_duration, self.segment_count)
        };
        if let Some(bps) = self.throughput_bps {
            transport = transport.with_throughput(bps);
        }
        if self.low_latency {
            transport = transport.with_low_latency();
        }
        if let Some(failure) = &self.failure {
            let error = match failure.status {
                Some(status) => FetchError::status(status, format!("scripted HTTP {status}")),
                None => FetchError::timeout("scripted timeout"),
            };
            match failure.sequence {
                Some(sequence) => transport.fail_segment(sequence, error),
                None => transport.fail_manifest(error),
            }
        }
        transport
    }

    /// Grow a live window by one segment per segment duration
    pub fn drive_live(&self, transport: MemoryTransport) -> Option<JoinHandle<()>> {
        if !self.live {
            return None;
        }
        let period = Duration::from_secs_f64(self.segment_duration);
        let ends_after = self.live_ends_after;
        Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut interval = tokio::time::interval_at(started + period, period);
            loop {
                interval.tick().await;
                if ends_after.is_some_and(|limit| started.elapsed().as_secs_f64() >= limit) {
                    transport.end_live();
                    tracing::info!("Scripted live stream ended");
                    break;
                }
                transport.advance_live(1);
            }
        }))
    }
}
