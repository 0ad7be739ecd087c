//! HLS playlist conversion
//!
//! Turns `m3u8-rs` playlists into the manifest model:
//! - Master playlists into a quality ladder with media playlist URIs
//! - Media playlists into segment timelines
//! - LL-HLS detection from `EXT-X-PART-INF`

use super::SegmentRef;
use crate::error::FetchError;
use crate::types::Quality;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use tracing::debug;
use url::Url;

/// A variant listed by a master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct VariantEntry {
    pub quality: Quality,
    pub uri: Url,
}

/// Segment timeline of one media playlist
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTimeline {
    pub segments: Vec<SegmentRef>,
    pub target_duration: f64,
    pub is_live: bool,
    pub low_latency: bool,
}

/// Either kind of playlist
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPlaylist {
    Master(Vec<VariantEntry>),
    Media(MediaTimeline),
}

/// Parse playlist bytes fetched from `base`
pub fn parse(bytes: &[u8], base: &Url) -> Result<ParsedPlaylist, FetchError> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(ParsedPlaylist::Master(variants(&master, base)?)),
        Ok(Playlist::MediaPlaylist(media)) => Ok(ParsedPlaylist::Media(timeline(&media, base)?)),
        Err(e) => Err(FetchError::parse(format!("invalid playlist {base}: {e:?}"))),
    }
}

/// Quality ladder of a master playlist, I-frame streams excluded
pub fn variants(master: &MasterPlaylist, base: &Url) -> Result<Vec<VariantEntry>, FetchError> {
    let mut entries = Vec::with_capacity(master.variants.len());
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        let (width, height) = variant
            .resolution
            .as_ref()
            .map(|r| (r.width as u32, r.height as u32))
            .unwrap_or((0, 0));
        let mut quality = Quality::new(
            String::new(),
            variant.codecs.clone().unwrap_or_default(),
            variant.bandwidth,
            width,
            height,
        );
        quality.name = quality.label();

        entries.push(VariantEntry {
            quality,
            uri: resolve(base, &variant.uri)?,
        });
    }
    debug!(variants = entries.len(), "Master playlist converted");
    Ok(entries)
}

/// Segment timeline of a media playlist.
///
/// On-demand playlists start at zero. Live playlists are placed at
/// `media_sequence * target_duration` so independently fetched variants line
/// up.
pub fn timeline(media: &MediaPlaylist, base: &Url) -> Result<MediaTimeline, FetchError> {
    let target_duration = media.target_duration as f64;
    let is_live = !media.end_list;
    let low_latency = media
        .unknown_tags
        .iter()
        .any(|t| t.tag.contains("PART-INF"));

    let mut start = if is_live {
        media.media_sequence as f64 * target_duration
    } else {
        0.0
    };
    let mut segments = Vec::with_capacity(media.segments.len());
    for (idx, segment) in media.segments.iter().enumerate() {
        let duration = segment.duration as f64;
        segments.push(SegmentRef {
            sequence: media.media_sequence + idx as u64,
            start,
            duration,
            uri: resolve(base, &segment.uri)?,
        });
        start += duration;
    }

    Ok(MediaTimeline {
        segments,
        target_duration,
        is_live,
        low_latency,
    })
}

fn resolve(base: &Url, relative: &str) -> Result<Url, FetchError> {
    base.join(relative)
        .map_err(|e| FetchError::parse(format!("invalid URI '{relative}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"
360p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"
720p/index.m3u8
";

    const VOD: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:4.0,
seg0.ts
#EXTINF:4.0,
seg1.ts
#EXTINF:2.5,
seg2.ts
#EXT-X-ENDLIST
";

    const LL_LIVE: &str = "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:2
#EXT-X-PART-INF:PART-TARGET=0.5
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:2.0,
seg100.ts
#EXTINF:2.0,
seg101.ts
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/stream/master.m3u8").unwrap()
    }

    #[test]
    fn test_master_playlist() {
        let ParsedPlaylist::Master(entries) = parse(MASTER.as_bytes(), &base()).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].quality.name, "360p");
        assert_eq!(entries[1].quality.bitrate, 2_500_000);
        assert_eq!(
            entries[1].uri.as_str(),
            "https://cdn.example.com/stream/720p/index.m3u8"
        );
    }

    #[test]
    fn test_vod_media_playlist() {
        let ParsedPlaylist::Media(media) = parse(VOD.as_bytes(), &base()).unwrap() else {
            panic!("expected media playlist");
        };
        assert!(!media.is_live);
        assert!(!media.low_latency);
        assert_eq!(media.target_duration, 4.0);
        let last = media.segments.last().unwrap();
        assert_eq!(last.start, 8.0);
        assert!((last.end() - 10.5).abs() < 1e-6);
    }

    #[test]
    fn test_low_latency_live_playlist() {
        let ParsedPlaylist::Media(media) = parse(LL_LIVE.as_bytes(), &base()).unwrap() else {
            panic!("expected media playlist");
        };
        assert!(media.is_live);
        assert!(media.low_latency);
        assert_eq!(media.segments[0].sequence, 100);
        assert_eq!(media.segments[0].start, 200.0);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = parse(b"<html>nope</html>", &base()).unwrap_err();
        assert_eq!(err.error_type(), crate::error::ErrorType::InvalidData);
    }
}
