//! HTTP transport for HLS sources

use super::Transport;
use crate::error::FetchError;
use crate::manifest::hls::{self, MediaTimeline, ParsedPlaylist};
use crate::manifest::{MediaType, SourceManifest, Variant};
use crate::types::Quality;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Fetches HLS playlists and segments over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &Url) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(
                status.as_u16(),
                format!("GET {url}: {status}"),
            ));
        }

        response.bytes().await.map_err(classify)
    }

    async fn media_timeline(&self, url: &Url) -> std::result::Result<MediaTimeline, FetchError> {
        let body = self.get(url).await?;
        match hls::parse(&body, url)? {
            ParsedPlaylist::Media(timeline) => Ok(timeline),
            ParsedPlaylist::Master(_) => Err(FetchError::parse(format!(
                "{url} is a master playlist where a media playlist was expected"
            ))),
        }
    }
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(error.to_string())
    } else if let Some(status) = error.status() {
        FetchError::status(status.as_u16(), error.to_string())
    } else {
        FetchError::io(error.to_string())
    }
}

fn manifest_from(variants: Vec<Variant>, timelines: &[MediaTimeline]) -> SourceManifest {
    SourceManifest {
        variants,
        is_live: timelines.iter().any(|t| t.is_live),
        low_latency_supported: timelines.iter().any(|t| t.low_latency),
        target_duration: timelines
            .iter()
            .map(|t| t.target_duration)
            .fold(0.0, f64::max),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn fetch_manifest(
        &self,
        url: &Url,
        media_type: MediaType,
    ) -> std::result::Result<SourceManifest, FetchError> {
        if media_type == MediaType::Mp4 {
            return Err(FetchError::unsupported(
                "progressive MP4 needs a demuxing transport",
            ));
        }

        let body = self.get(url).await?;
        match hls::parse(&body, url)? {
            ParsedPlaylist::Media(timeline) => {
                debug!(segments = timeline.segments.len(), "Single media playlist");
                let variant = Variant {
                    quality: Quality::new("default", "", 0, 0, 0),
                    segments: timeline.segments.clone(),
                };
                Ok(manifest_from(vec![variant], &[timeline]))
            }
            ParsedPlaylist::Master(entries) => {
                let mut variants = Vec::with_capacity(entries.len());
                let mut timelines = Vec::with_capacity(entries.len());
                for entry in entries {
                    let timeline = match self.media_timeline(&entry.uri).await {
                        Ok(timeline) => timeline,
                        Err(e) if entries_may_skip(&e) => {
                            warn!(uri = %entry.uri, error = %e, "Skipping unavailable variant");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    variants.push(Variant {
                        quality: entry.quality,
                        segments: timeline.segments.clone(),
                    });
                    timelines.push(timeline);
                }
                debug!(variants = variants.len(), "Master playlist resolved");
                Ok(manifest_from(variants, &timelines))
            }
        }
    }

    async fn fetch_segment(&self, uri: &Url) -> std::result::Result<Bytes, FetchError> {
        self.get(uri).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// A variant whose playlist is missing does not sink the whole source
fn entries_may_skip(error: &FetchError) -> bool {
    matches!(error.status, Some(404 | 410))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_merges_timeline_flags() {
        let live = MediaTimeline {
            segments: vec![],
            target_duration: 2.0,
            is_live: true,
            low_latency: true,
        };
        let vod = MediaTimeline {
            segments: vec![],
            target_duration: 6.0,
            is_live: false,
            low_latency: false,
        };
        let manifest = manifest_from(vec![], &[live, vod]);
        assert!(manifest.is_live);
        assert!(manifest.low_latency_supported);
        assert_eq!(manifest.target_duration, 6.0);
    }

    #[test]
    fn test_missing_variant_is_skippable() {
        assert!(entries_may_skip(&FetchError::status(404, "gone")));
        assert!(!entries_may_skip(&FetchError::status(403, "denied")));
        assert!(!entries_may_skip(&FetchError::io("reset")));
    }

    #[tokio::test]
    async fn test_mp4_not_supported() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let url = Url::parse("https://cdn.example.com/clip.mp4").unwrap();
        let err = transport.fetch_manifest(&url, MediaType::Mp4).await.unwrap_err();
        assert_eq!(err.error_type(), crate::error::ErrorType::NotSupported);
    }
}
