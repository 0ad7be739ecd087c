//! Source manifest model and segment timelines

#[cfg(feature = "http")]
pub mod hls;

use crate::{types::Quality, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Tolerance when comparing segment boundaries (seconds)
const BOUNDARY_EPSILON: f64 = 1e-3;

/// Container formats the engine can load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Hls,
    Mp4,
}

impl MediaType {
    /// Resolve the media type from an explicit MIME type, else from the path
    /// extension. An explicit type that is not recognized is not supported.
    pub fn infer(path: &str, explicit: Option<&str>) -> Result<MediaType> {
        if let Some(mime) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
            return Self::from_mime(mime)
                .ok_or_else(|| Error::UnsupportedMediaType(mime.to_string()));
        }

        let path = path
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(path)
            .to_lowercase();
        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            Ok(MediaType::Hls)
        } else if path.ends_with(".mp4") || path.ends_with(".m4v") {
            Ok(MediaType::Mp4)
        } else {
            // Streaming endpoints rarely carry an extension
            Ok(MediaType::Hls)
        }
    }

    pub fn from_mime(mime: &str) -> Option<MediaType> {
        match mime.to_ascii_lowercase().as_str() {
            "application/x-mpegurl" | "application/vnd.apple.mpegurl" | "audio/mpegurl" => {
                Some(MediaType::Hls)
            }
            "video/mp4" | "audio/mp4" => Some(MediaType::Mp4),
            _ => None,
        }
    }

    pub fn as_mime(&self) -> &'static str {
        match self {
            MediaType::Hls => "application/x-mpegURL",
            MediaType::Mp4 => "video/mp4",
        }
    }
}

/// One fetchable media segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Media sequence number, stable across live refreshes
    pub sequence: u64,
    /// Presentation start (seconds)
    pub start: f64,
    pub duration: f64,
    pub uri: Url,
}

impl SegmentRef {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// One quality and its segment list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub quality: Quality,
    pub segments: Vec<SegmentRef>,
}

/// What a transport reports for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub variants: Vec<Variant>,
    pub is_live: bool,
    pub low_latency_supported: bool,
    /// Target segment duration (seconds)
    pub target_duration: f64,
}

impl SourceManifest {
    pub fn qualities(&self) -> impl Iterator<Item = &Quality> {
        self.variants.iter().map(|v| &v.quality)
    }

    /// Check the manifest is usable before any session state is built
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(Error::InvalidData("manifest lists no variants".into()));
        }
        if !self.target_duration.is_finite() || self.target_duration < 0.0 {
            return Err(Error::InvalidData(format!(
                "target duration {} is not a valid length",
                self.target_duration
            )));
        }
        if self.is_live && self.target_duration <= 0.0 {
            return Err(Error::InvalidData("live manifest without a target duration".into()));
        }
        for variant in &self.variants {
            if variant.segments.is_empty() && !self.is_live {
                return Err(Error::InvalidData(format!(
                    "variant {} has no segments",
                    variant.quality
                )));
            }
            for segment in &variant.segments {
                if !(segment.duration > 0.0)
                    || !segment.duration.is_finite()
                    || !segment.start.is_finite()
                {
                    return Err(Error::InvalidData(format!(
                        "segment {} has invalid timing",
                        segment.sequence
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Segment timelines of the loaded source, one per quality
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    variants: Vec<Variant>,
    target_duration: f64,
}

impl SegmentIndex {
    pub fn new(manifest: &SourceManifest) -> Self {
        let mut variants = manifest.variants.clone();
        for variant in &mut variants {
            variant.segments.sort_by_key(|s| s.sequence);
            chain_boundaries(&mut variant.segments);
        }
        Self {
            variants,
            target_duration: manifest.target_duration,
        }
    }

    pub fn target_duration(&self) -> f64 {
        self.target_duration
    }

    pub fn segments(&self, quality: &Quality) -> &[SegmentRef] {
        self.variants
            .iter()
            .find(|v| &v.quality == quality)
            .map(|v| v.segments.as_slice())
            .unwrap_or(&[])
    }

    fn reference(&self) -> &[SegmentRef] {
        self.variants
            .first()
            .map(|v| v.segments.as_slice())
            .unwrap_or(&[])
    }

    /// Start of the oldest listed segment
    pub fn window_start(&self) -> f64 {
        self.reference().first().map(|s| s.start).unwrap_or(0.0)
    }

    /// End of the newest listed segment
    pub fn window_end(&self) -> f64 {
        self.reference().last().map(SegmentRef::end).unwrap_or(0.0)
    }

    /// First segment of `quality` that still has media after `time`
    pub fn segment_after(&self, quality: &Quality, time: f64) -> Option<&SegmentRef> {
        let segments = self.segments(quality);
        let idx = segments.partition_point(|s| s.end() <= time + BOUNDARY_EPSILON);
        segments.get(idx)
    }

    /// The last segment of `quality`
    pub fn last_segment(&self, quality: &Quality) -> Option<&SegmentRef> {
        self.segments(quality).last()
    }

    /// Merge a refreshed manifest by media sequence number.
    ///
    /// Known sequences keep their timing; new ones are placed after their
    /// predecessor. Sequences no longer listed fall out of the window.
    /// Returns the number of segments added across all qualities.
    pub fn merge(&mut self, refreshed: &SourceManifest) -> usize {
        self.target_duration = refreshed.target_duration;
        let mut added = 0;

        for fresh in &refreshed.variants {
            let Some(variant) = self.variants.iter_mut().find(|v| v.quality == fresh.quality) else {
                continue;
            };
            let Some(oldest) = fresh.segments.iter().map(|s| s.sequence).min() else {
                continue;
            };

            let mut incoming: Vec<&SegmentRef> = fresh.segments.iter().collect();
            incoming.sort_by_key(|s| s.sequence);
            for segment in incoming {
                let idx = variant
                    .segments
                    .partition_point(|s| s.sequence < segment.sequence);
                if variant.segments.get(idx).map(|s| s.sequence) == Some(segment.sequence) {
                    continue;
                }
                let mut placed = segment.clone();
                if let Some(prev) = idx.checked_sub(1).and_then(|i| variant.segments.get(i)) {
                    if prev.sequence + 1 == placed.sequence {
                        placed.start = prev.end();
                    }
                }
                variant.segments.insert(idx, placed);
                added += 1;
            }

            variant.segments.retain(|s| s.sequence >= oldest);
        }

        if added > 0 {
            debug!(
                added,
                window_start = self.window_start(),
                window_end = self.window_end(),
                "Segment index refreshed"
            );
        }
        added
    }
}

/// Snap consecutive segments that almost touch onto their predecessor's end,
/// so buffered ranges built from them are contiguous
fn chain_boundaries(segments: &mut [SegmentRef]) {
    for i in 1..segments.len() {
        let (prev_sequence, prev_end) = (segments[i - 1].sequence, segments[i - 1].end());
        let segment = &mut segments[i];
        if segment.sequence == prev_sequence + 1
            && segment.start != prev_end
            && (segment.start - prev_end).abs() <= BOUNDARY_EPSILON
        {
            segment.start = prev_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn segments(first_sequence: u64, first_start: f64, count: u64) -> Vec<SegmentRef> {
        (0..count)
            .map(|i| SegmentRef {
                sequence: first_sequence + i,
                start: first_start + 2.0 * i as f64,
                duration: 2.0,
                uri: Url::parse(&format!("memory://test/{}.ts", first_sequence + i)).unwrap(),
            })
            .collect()
    }

    fn manifest(first_sequence: u64, first_start: f64, count: u64, is_live: bool) -> SourceManifest {
        SourceManifest {
            variants: vec![Variant {
                quality: Quality::new("360p", "avc1", 800_000, 640, 360),
                segments: segments(first_sequence, first_start, count),
            }],
            is_live,
            low_latency_supported: false,
            target_duration: 2.0,
        }
    }

    #[rstest]
    #[case("https://cdn.example.com/live/master.m3u8", None, MediaType::Hls)]
    #[case("https://cdn.example.com/clip.MP4?token=1", None, MediaType::Mp4)]
    #[case("https://cdn.example.com/channel", None, MediaType::Hls)]
    #[case("clip.bin", Some("video/mp4"), MediaType::Mp4)]
    #[case("clip.bin", Some("application/vnd.apple.mpegurl"), MediaType::Hls)]
    fn test_media_type_inference(
        #[case] path: &str,
        #[case] explicit: Option<&str>,
        #[case] expected: MediaType,
    ) {
        assert_eq!(MediaType::infer(path, explicit).unwrap(), expected);
    }

    #[test]
    fn test_unknown_explicit_type_not_supported() {
        let err = MediaType::infer("video.m3u8", Some("application/dash+xml")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_validate() {
        assert!(manifest(0, 0.0, 3, false).validate().is_ok());

        let empty = SourceManifest {
            variants: vec![],
            ..manifest(0, 0.0, 3, false)
        };
        assert!(matches!(empty.validate(), Err(Error::InvalidData(_))));
    }

    #[rstest]
    #[case::infinite_target(f64::INFINITY, false, 2.0)]
    #[case::nan_target(f64::NAN, false, 2.0)]
    #[case::live_without_target(0.0, true, 2.0)]
    #[case::infinite_segment(2.0, false, f64::INFINITY)]
    fn test_validate_rejects_bad_timing(
        #[case] target_duration: f64,
        #[case] is_live: bool,
        #[case] segment_duration: f64,
    ) {
        let mut source = manifest(0, 0.0, 3, is_live);
        source.target_duration = target_duration;
        source.variants[0].segments[1].duration = segment_duration;
        assert!(matches!(source.validate(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_index_chains_near_boundaries() {
        let mut source = manifest(0, 0.0, 3, false);
        for (i, segment) in source.variants[0].segments.iter_mut().enumerate() {
            segment.duration = 0.1;
            segment.start = i as f64 * 0.1;
        }
        // Off by rounding noise; a real gap stays put
        source.variants[0].segments[2].start = 0.2000001;
        let index = SegmentIndex::new(&source);
        let segments = index.segments(&source.variants[0].quality);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end());
        }

        source.variants[0].segments[2].start = 0.5;
        let index = SegmentIndex::new(&source);
        assert_eq!(index.segments(&source.variants[0].quality)[2].start, 0.5);
    }

    #[test]
    fn test_segment_after() {
        let source = manifest(0, 0.0, 5, false);
        let index = SegmentIndex::new(&source);
        let quality = &source.variants[0].quality;

        assert_eq!(index.segment_after(quality, 0.0).map(|s| s.sequence), Some(0));
        assert_eq!(index.segment_after(quality, 3.0).map(|s| s.sequence), Some(1));
        assert_eq!(index.segment_after(quality, 4.0).map(|s| s.sequence), Some(2));
        assert_eq!(index.segment_after(quality, 10.0), None);
        assert_eq!(index.window_end(), 10.0);
    }

    #[test]
    fn test_merge_by_sequence() {
        let source = manifest(10, 100.0, 3, true);
        let mut index = SegmentIndex::new(&source);
        let quality = source.variants[0].quality.clone();

        // The refresh reports different absolute starts; timing follows the
        // existing timeline
        let refreshed = manifest(11, 0.0, 4, true);
        assert_eq!(index.merge(&refreshed), 2);

        let listed: Vec<(u64, f64)> = index
            .segments(&quality)
            .iter()
            .map(|s| (s.sequence, s.start))
            .collect();
        assert_eq!(listed, vec![(11, 102.0), (12, 104.0), (13, 106.0), (14, 108.0)]);
        assert_eq!(index.window_start(), 102.0);
        assert_eq!(index.window_end(), 110.0);

        assert_eq!(index.merge(&refreshed), 0);
    }
}
