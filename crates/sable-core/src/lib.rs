//! Sable Core - Adaptive Bitrate Playback Engine
//!
//! This crate decides what a streaming player does next:
//! - Playback state machine with deferred play/seek intent
//! - Buffer range tracking and rebuffer detection
//! - Quality catalog with ceilings and pinning
//! - Throughput-driven ABR
//! - Live edge tracking, low-latency negotiation and rebuffer-to-live
//! - Typed event channel
//!
//! Fetching and decoding are pluggable: a [`Transport`] supplies manifests and
//! segments, a [`MediaSink`] reports what became playable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Sable Core                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   Player façade ──commands──▶ Actor task ──effects──▶ EventBus  │
//! │        ▲                          │                             │
//! │        └────── watch snapshot ────┤                             │
//! │                                   ▼                             │
//! │                          ┌─────────────────┐                    │
//! │                          │     Engine      │                    │
//! │                          └────────┬────────┘                    │
//! │            ┌───────────────┬──────┴───────┬───────────────┐     │
//! │     ┌──────┴──────┐ ┌──────┴──────┐ ┌─────┴──────┐ ┌──────┴───┐ │
//! │     │   Buffer    │ │   Quality   │ │    ABR     │ │   Live   │ │
//! │     │   Manager   │ │   Catalog   │ │ Controller │ │   Edge   │ │
//! │     └─────────────┘ └─────────────┘ └────────────┘ └──────────┘ │
//! │                                                                 │
//! │   Transport (memory / http) ─── fetches ───▶ MediaSink          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sable_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> sable_core::Result<()> {
//! let ladder = vec![
//!     Quality::new("360p", "avc1.4d401e", 800_000, 640, 360),
//!     Quality::new("720p", "avc1.4d401f", 2_500_000, 1280, 720),
//! ];
//! let transport = MemoryTransport::vod(ladder, 2.0, 50);
//! let player = Player::new(Arc::new(transport), PlayerConfig::default())?;
//! let mut events = player.subscribe();
//!
//! player.set_auto_max_bitrate(1_000_000);
//! player.load("memory://demo/master.m3u8", None);
//! player.play();
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod abr;
mod actor;
pub mod buffer;
pub mod config;
pub mod control;
pub mod cues;
pub mod engine;
pub mod error;
pub mod events;
pub mod live;
pub mod manifest;
pub mod player;
pub mod quality;
pub mod session;
pub mod transport;
pub mod types;

pub use abr::{AbrController, AbrDecision, AbrReason, Estimator, ThroughputEstimator};
pub use buffer::BufferManager;
pub use config::{AbrConfig, LiveConfig, PlayerConfig};
pub use control::{BufferQuery, LiveControl, QualityControl};
pub use engine::{Command, Effect, Engine, Signal, Snapshot};
pub use error::{Error, ErrorType, FetchError, PlayerError, Result};
pub use events::{EventBus, EventName, EventSubscription, MetadataEvent, PlaybackEvent, PlayerEvent};
pub use live::LiveEdgeController;
pub use manifest::{MediaType, SourceManifest};
pub use player::{Player, RenderHandle};
pub use quality::{AnyDevice, DeviceCapabilities, QualityCatalog};
pub use transport::{MediaSink, MemoryTransport, TimelineSink, Transport};
pub use types::*;

#[cfg(feature = "http")]
pub use transport::HttpTransport;

/// Everything needed to drive a player
pub mod prelude {
    pub use crate::control::{BufferQuery, LiveControl, QualityControl};
    pub use crate::events::{EventName, PlaybackEvent, PlayerEvent};
    pub use crate::transport::{MemoryTransport, Transport};
    pub use crate::types::{BufferRange, PlayerState, Quality};
    pub use crate::{Player, PlayerConfig};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library banner
pub fn init() {
    tracing::info!(version = VERSION, "Sable Core initialized");
}
