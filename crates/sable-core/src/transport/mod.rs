//! Transport and render seams
//!
//! The engine never touches the network or a decoder directly. A
//! [`Transport`] fetches manifests and segment bytes; a [`MediaSink`] accepts
//! appended media and reports back what became playable.

pub mod memory;

#[cfg(feature = "http")]
pub mod http;

pub use memory::MemoryTransport;

#[cfg(feature = "http")]
pub use http::HttpTransport;

use crate::error::FetchError;
use crate::manifest::{MediaType, SegmentRef, SourceManifest};
use crate::types::{BufferRange, Cue, Quality};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

/// Fetches manifests and segments
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch and interpret the manifest at `url`
    async fn fetch_manifest(&self, url: &Url, media_type: MediaType)
        -> std::result::Result<SourceManifest, FetchError>;

    /// Fetch one segment
    async fn fetch_segment(&self, uri: &Url) -> std::result::Result<Bytes, FetchError>;

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

/// What the render layer reports after an append
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendOutcome {
    /// Newly decodable time ranges
    pub buffered: Vec<BufferRange>,
    /// Cues parsed from the appended media
    pub cues: Vec<Cue>,
}

/// Decode/render seam
pub trait MediaSink: Send {
    /// Hand a fetched segment to the decoder
    fn append(&mut self, segment: &SegmentRef, quality: &Quality, data: &Bytes) -> Result<AppendOutcome>;

    /// Drop everything appended so far
    fn reset(&mut self);
}

/// Sink that treats every segment as decodable over its own time span.
///
/// Optionally carries cues, delivered with the segment whose span contains
/// their start time.
#[derive(Debug, Clone, Default)]
pub struct TimelineSink {
    cues: Vec<Cue>,
    appended: u64,
}

impl TimelineSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cues(mut cues: Vec<Cue>) -> Self {
        cues.sort_by(|a, b| a.start_time().total_cmp(&b.start_time()));
        Self { cues, appended: 0 }
    }

    /// Segments appended since the last reset
    pub fn appended(&self) -> u64 {
        self.appended
    }
}

impl MediaSink for TimelineSink {
    fn append(&mut self, segment: &SegmentRef, _quality: &Quality, data: &Bytes) -> Result<AppendOutcome> {
        if data.is_empty() {
            return Err(Error::Decode {
                sequence: segment.sequence,
                message: "empty segment".into(),
            });
        }
        self.appended += 1;

        let cues = self
            .cues
            .iter()
            .filter(|c| c.start_time() >= segment.start && c.start_time() < segment.end())
            .cloned()
            .collect();

        Ok(AppendOutcome {
            buffered: vec![BufferRange::new(segment.start, segment.end())],
            cues,
        })
    }

    fn reset(&mut self) {
        self.appended = 0;
    }
}
