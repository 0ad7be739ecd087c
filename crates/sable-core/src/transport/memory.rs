//! Scripted in-memory transport
//!
//! Serves a synthetic quality ladder with fixed-duration segments. Throughput,
//! failures and live window growth are scripted through a shared handle, so
//! tests and the CLI can steer the source while a player consumes it.

use super::Transport;
use crate::error::FetchError;
use crate::manifest::{MediaType, SegmentRef, SourceManifest, Variant};
use crate::types::Quality;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Clone)]
struct MemorySource {
    qualities: Vec<Quality>,
    segment_duration: f64,
    first_sequence: u64,
    segment_count: u64,
    is_live: bool,
    window: Option<u64>,
    low_latency: bool,
    throughput_bps: Option<u64>,
    manifest_failure: Option<FetchError>,
    segment_failures: HashMap<u64, FetchError>,
    manifest_requests: u64,
    segment_requests: u64,
}

/// In-memory source; clones share the same script
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    source: Arc<Mutex<MemorySource>>,
}

impl MemoryTransport {
    fn with_source(source: MemorySource) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
        }
    }

    /// On-demand source of `segment_count` segments per quality
    pub fn vod(qualities: Vec<Quality>, segment_duration: f64, segment_count: u64) -> Self {
        Self::with_source(MemorySource {
            qualities,
            segment_duration,
            first_sequence: 0,
            segment_count,
            is_live: false,
            window: None,
            low_latency: false,
            throughput_bps: None,
            manifest_failure: None,
            segment_failures: HashMap::new(),
            manifest_requests: 0,
            segment_requests: 0,
        })
    }

    /// Live source listing the most recent `window` segments
    pub fn live(qualities: Vec<Quality>, segment_duration: f64, window: u64) -> Self {
        let transport = Self::vod(qualities, segment_duration, window);
        {
            let mut source = transport.lock();
            source.is_live = true;
            source.window = Some(window.max(1));
        }
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MemorySource> {
        self.source.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulated link speed; unlimited when unset
    pub fn with_throughput(self, bps: u64) -> Self {
        self.set_throughput(Some(bps));
        self
    }

    /// Advertise low-latency delivery
    pub fn with_low_latency(self) -> Self {
        self.lock().low_latency = true;
        self
    }

    pub fn set_throughput(&self, bps: Option<u64>) {
        self.lock().throughput_bps = bps.filter(|b| *b > 0);
    }

    /// Fail every manifest request with `error`
    pub fn fail_manifest(&self, error: FetchError) {
        self.lock().manifest_failure = Some(error);
    }

    /// Fail requests for segment `sequence` with `error`
    pub fn fail_segment(&self, sequence: u64, error: FetchError) {
        self.lock().segment_failures.insert(sequence, error);
    }

    pub fn clear_failures(&self) {
        let mut source = self.lock();
        source.manifest_failure = None;
        source.segment_failures.clear();
    }

    /// Publish `count` new live segments, sliding the window
    pub fn advance_live(&self, count: u64) {
        let mut source = self.lock();
        source.segment_count += count;
        if let Some(window) = source.window {
            if source.segment_count > window {
                source.first_sequence += source.segment_count - window;
                source.segment_count = window;
            }
        }
        debug!(
            first_sequence = source.first_sequence,
            segments = source.segment_count,
            "Live window advanced"
        );
    }

    /// The live stream ends; the next manifest is on-demand
    pub fn end_live(&self) {
        self.lock().is_live = false;
    }

    pub fn manifest_requests(&self) -> u64 {
        self.lock().manifest_requests
    }

    pub fn segment_requests(&self) -> u64 {
        self.lock().segment_requests
    }

    /// Live edge as currently listed
    pub fn live_edge(&self) -> f64 {
        let source = self.lock();
        (source.first_sequence + source.segment_count) as f64 * source.segment_duration
    }
}

impl MemorySource {
    fn manifest(&self, media_type: MediaType) -> SourceManifest {
        let qualities: Vec<Quality> = match media_type {
            // Progressive files carry one quality
            MediaType::Mp4 => self.qualities.iter().take(1).cloned().collect(),
            MediaType::Hls => self.qualities.clone(),
        };

        let variants = qualities
            .into_iter()
            .enumerate()
            .map(|(idx, quality)| Variant {
                segments: (self.first_sequence..self.first_sequence + self.segment_count)
                    .filter_map(|sequence| self.segment(idx, sequence))
                    .collect(),
                quality,
            })
            .collect();

        SourceManifest {
            variants,
            is_live: self.is_live,
            low_latency_supported: self.low_latency,
            target_duration: self.segment_duration,
        }
    }

    fn segment(&self, quality_index: usize, sequence: u64) -> Option<SegmentRef> {
        let uri = Url::parse(&format!("memory://segments/{quality_index}/{sequence}")).ok()?;
        Some(SegmentRef {
            sequence,
            start: sequence as f64 * self.segment_duration,
            duration: self.segment_duration,
            uri,
        })
    }

    fn is_listed(&self, sequence: u64) -> bool {
        sequence >= self.first_sequence && sequence < self.first_sequence + self.segment_count
    }
}

/// `memory://segments/{quality}/{sequence}`
fn parse_segment_uri(uri: &Url) -> Option<(usize, u64)> {
    let mut parts = uri.path_segments()?.filter(|p| !p.is_empty());
    let quality = parts.next()?.parse().ok()?;
    let sequence = parts.next()?.parse().ok()?;
    Some((quality, sequence))
}

#[async_trait]
impl Transport for MemoryTransport {
    #[instrument(skip(self))]
    async fn fetch_manifest(&self, _url: &Url, media_type: MediaType) -> Result<SourceManifest, FetchError> {
        let manifest = {
            let mut source = self.lock();
            source.manifest_requests += 1;
            if let Some(error) = source.manifest_failure.clone() {
                return Err(error);
            }
            source.manifest(media_type)
        };
        debug!(
            variants = manifest.variants.len(),
            is_live = manifest.is_live,
            "Memory manifest served"
        );
        Ok(manifest)
    }

    async fn fetch_segment(&self, uri: &Url) -> Result<Bytes, FetchError> {
        let (size, delay) = {
            let mut source = self.lock();
            source.segment_requests += 1;

            let (quality_index, sequence) = parse_segment_uri(uri)
                .ok_or_else(|| FetchError::status(400, format!("bad segment uri {uri}")))?;
            if let Some(error) = source.segment_failures.get(&sequence) {
                return Err(error.clone());
            }
            let quality = source
                .qualities
                .get(quality_index)
                .ok_or_else(|| FetchError::status(404, format!("no quality {quality_index}")))?;
            if !source.is_listed(sequence) {
                return Err(FetchError::status(404, format!("segment {sequence} not listed")));
            }

            let size = ((quality.bitrate as f64 * source.segment_duration) / 8.0).max(1.0) as usize;
            let delay = source
                .throughput_bps
                .map(|bps| Duration::from_secs_f64(size as f64 * 8.0 / bps as f64));
            (size, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Bytes::from(vec![0u8; size]))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<Quality> {
        vec![
            Quality::new("360p", "avc1.4d401e", 800_000, 640, 360),
            Quality::new("720p", "avc1.4d401f", 2_500_000, 1280, 720),
        ]
    }

    fn url() -> Url {
        Url::parse("memory://source/master.m3u8").unwrap()
    }

    #[tokio::test]
    async fn test_vod_manifest() {
        let transport = MemoryTransport::vod(ladder(), 2.0, 50);
        let manifest = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        assert_eq!(manifest.variants.len(), 2);
        assert!(!manifest.is_live);
        assert_eq!(manifest.variants[1].segments.last().unwrap().end(), 100.0);
        assert_eq!(transport.manifest_requests(), 1);
    }

    #[test]
    fn test_mp4_has_single_quality() {
        let transport = MemoryTransport::vod(ladder(), 2.0, 5);
        let manifest = tokio_test::block_on(transport.fetch_manifest(&url(), MediaType::Mp4)).unwrap();
        assert_eq!(manifest.variants.len(), 1);
    }

    #[tokio::test]
    async fn test_segment_size_follows_bitrate() {
        let transport = MemoryTransport::vod(ladder(), 2.0, 5);
        let manifest = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        let uri = &manifest.variants[1].segments[0].uri;
        let bytes = transport.fetch_segment(uri).await.unwrap();
        assert_eq!(bytes.len(), 625_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_delays_segments() {
        let transport = MemoryTransport::vod(ladder(), 2.0, 5).with_throughput(1_600_000);
        let manifest = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        let started = tokio::time::Instant::now();
        transport
            .fetch_segment(&manifest.variants[0].segments[0].uri)
            .await
            .unwrap();
        // 200 kB at 1.6 Mbps
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1010));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let transport = MemoryTransport::vod(ladder(), 2.0, 5);
        transport.fail_segment(2, FetchError::status(500, "boom"));
        let manifest = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        let err = transport
            .fetch_segment(&manifest.variants[0].segments[2].uri)
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(500));

        transport.fail_manifest(FetchError::io("connection reset"));
        assert!(transport.fetch_manifest(&url(), MediaType::Hls).await.is_err());
    }

    #[tokio::test]
    async fn test_live_window_slides() {
        let transport = MemoryTransport::live(ladder(), 2.0, 5);
        transport.advance_live(3);
        let manifest = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        let segments = &manifest.variants[0].segments;
        assert!(manifest.is_live);
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0].sequence, 3);
        assert_eq!(transport.live_edge(), 16.0);

        let gone = Url::parse("memory://segments/0/1").unwrap();
        assert_eq!(transport.fetch_segment(&gone).await.unwrap_err().status, Some(404));

        transport.end_live();
        let ended = transport.fetch_manifest(&url(), MediaType::Hls).await.unwrap();
        assert!(!ended.is_live);
    }
}
