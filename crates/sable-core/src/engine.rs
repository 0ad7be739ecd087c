//! Playback engine
//!
//! The deterministic core of a player. It consumes [`Command`]s from the user
//! and [`Signal`]s from the outside world (fetch completions, clock ticks,
//! render-layer reports) and answers with an ordered list of [`Effect`]s:
//! fetches to start or cancel, refresh timers and events to emit.
//!
//! The engine never awaits and never reads a clock, so every transition can be
//! driven step by step in tests. The actor in `actor.rs` runs it against a
//! real transport.

use crate::abr::{AbrContext, AbrController};
use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::cues::CueTimeline;
use crate::error::{Error, FetchError};
use crate::events::{PlaybackEvent, PlayerEvent};
use crate::live::{LiveEdgeController, LiveWindow};
use crate::manifest::{MediaType, SegmentIndex, SegmentRef, SourceManifest};
use crate::quality::{DeviceCapabilities, QualityCatalog, QualityConstraints};
use crate::session::{
    PendingIntent, PendingSwitch, PlaybackSession, Preferences, SourceInfo,
};
use crate::transport::MediaSink;
use crate::types::{BufferRange, LogLevel, PlayerState, Quality, SessionId};
use bytes::Bytes;
use std::time::Duration;
use tracing::instrument;
use url::Url;

/// Playhead this close to the duration counts as the end (seconds)
pub const END_EPSILON: f64 = 0.05;
const COVERAGE_EPSILON: f64 = 1e-3;

/// Engine diagnostics, gated by the player's own log level
macro_rules! player_log {
    ($engine:ident, $level:ident, $($arg:tt)+) => {
        if $engine.prefs.log_level.enables(tracing::Level::$level) {
            tracing::event!(tracing::Level::$level, $($arg)+);
        }
    };
}

/// Identifies one fetch; completions carrying an unknown id are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// User operations
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load {
        path: String,
        media_type: Option<String>,
    },
    Play,
    Pause,
    SeekTo(f64),
    SetVolume(f64),
    SetMuted(bool),
    SetPlaybackRate(f64),
    SetAutoplay(bool),
    SetInitialBufferDuration(f64),
    SetQuality {
        quality: Quality,
        adaptive: bool,
    },
    SetAutoQualityMode(bool),
    /// `None` lifts the ceiling
    SetAutoMaxBitrate(Option<u64>),
    SetAutoMaxQuality(Quality),
    SetAutoMaxVideoSize {
        width: Option<u32>,
        height: Option<u32>,
    },
    SetLiveLowLatencyEnabled(bool),
    SetRebufferToLive(bool),
    SetLogLevel(LogLevel),
}

/// Reports from fetches, clocks and the render layer
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    ManifestLoaded {
        request: RequestId,
        result: Result<SourceManifest, FetchError>,
    },
    SegmentLoaded {
        request: RequestId,
        result: Result<Bytes, FetchError>,
        elapsed: Duration,
    },
    /// Internal clock advanced by wall time
    Clock(Duration),
    /// Render layer reports the playhead
    PositionReported(f64),
    /// Render layer reports decodable ranges
    BufferReported(Vec<BufferRange>),
    /// Live manifest refresh timer fired
    RefreshDue,
    PlaybackBlocked,
    AudioBlocked,
    NetworkUnavailable,
}

/// What the engine asks its host to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchManifest {
        request: RequestId,
        url: Url,
        media_type: MediaType,
    },
    FetchSegment {
        request: RequestId,
        uri: Url,
    },
    /// Abandon one fetch
    Cancel(RequestId),
    /// Abandon every fetch
    CancelAll,
    /// Fire [`Signal::RefreshDue`] after the delay, replacing any armed timer
    ScheduleRefresh(Duration),
    CancelRefresh,
    Emit(PlayerEvent),
}

/// Committed player state as seen by getters
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: PlayerState,
    pub position: f64,
    pub duration: f64,
    pub buffered: Vec<BufferRange>,
    pub buffered_range: BufferRange,
    pub buffer_duration: f64,
    pub qualities: Vec<Quality>,
    pub quality: Option<Quality>,
    pub auto_quality: bool,
    pub constraints: QualityConstraints,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub autoplay: bool,
    pub paused: bool,
    pub live: bool,
    pub low_latency: bool,
    pub low_latency_enabled: bool,
    pub rebuffer_to_live: bool,
    pub live_latency: f64,
    pub session_id: Option<SessionId>,
    pub initial_buffer_duration: f64,
    pub bandwidth_estimate: Option<u64>,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone)]
struct SegmentFetch {
    request: RequestId,
    segment: SegmentRef,
    quality: Quality,
}

/// Deterministic playback state machine
pub struct Engine {
    config: PlayerConfig,
    prefs: Preferences,
    intent: PendingIntent,
    state: PlayerState,
    session: Option<PlaybackSession>,
    buffer: BufferManager,
    catalog: QualityCatalog,
    constraints: QualityConstraints,
    index: SegmentIndex,
    cues: CueTimeline,
    abr: AbrController,
    live: LiveEdgeController,
    sink: Box<dyn MediaSink>,
    device: Box<dyn DeviceCapabilities>,
    next_request: u64,
    manifest_fetch: Option<(RequestId, bool)>,
    segment_fetch: Option<SegmentFetch>,
    last_appended: Option<(u64, Quality)>,
    effects: Vec<Effect>,
}

impl Engine {
    /// Create an engine; the first effect announces the player
    pub fn new(
        config: PlayerConfig,
        sink: Box<dyn MediaSink>,
        device: Box<dyn DeviceCapabilities>,
    ) -> Self {
        let mut engine = Self {
            prefs: Preferences::from_config(&config),
            intent: PendingIntent::default(),
            state: PlayerState::Idle,
            session: None,
            buffer: BufferManager::new(),
            catalog: QualityCatalog::default(),
            constraints: QualityConstraints::default(),
            index: SegmentIndex::default(),
            cues: CueTimeline::new(),
            abr: AbrController::new(config.abr.clone()),
            live: LiveEdgeController::new(config.live.clone()),
            sink,
            device,
            next_request: 0,
            manifest_fetch: None,
            segment_fetch: None,
            last_appended: None,
            effects: Vec::new(),
            config,
        };
        engine.emit(PlaybackEvent::Initialized);
        engine
    }

    /// Take the effects produced so far
    pub fn drain(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        let position = self.position();
        Snapshot {
            state: self.state,
            position,
            duration: self.session.as_ref().map(|s| s.duration).unwrap_or(0.0),
            buffered: self.buffer.ranges().to_vec(),
            buffered_range: self.buffer.buffered_range(position),
            buffer_duration: self.buffer.buffer_duration(position),
            qualities: self.catalog.qualities().to_vec(),
            quality: self.session.as_ref().and_then(|s| s.current_quality.clone()),
            auto_quality: self.catalog.is_auto(),
            constraints: self.constraints,
            volume: self.prefs.volume,
            muted: self.prefs.muted,
            playback_rate: self.prefs.playback_rate,
            autoplay: self.prefs.autoplay,
            paused: self.session.as_ref().is_some_and(|s| s.ready && s.paused),
            live: self.live.is_live(),
            low_latency: self.live.is_low_latency(),
            low_latency_enabled: self.live.low_latency_enabled(),
            rebuffer_to_live: self.live.rebuffer_to_live(),
            live_latency: self.live.latency(position),
            session_id: self.session.as_ref().and_then(|s| s.id),
            initial_buffer_duration: self.prefs.initial_buffer_duration,
            bandwidth_estimate: self.abr.estimate_bps(),
            log_level: self.prefs.log_level,
        }
    }

    /// Apply one user operation
    #[instrument(skip(self), level = "debug")]
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load { path, media_type } => self.load(path, media_type),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::SeekTo(time) => self.seek(time),
            Command::SetVolume(volume) => {
                if self.prefs.set_volume(volume) {
                    self.emit(PlaybackEvent::VolumeChanged(volume));
                }
            }
            Command::SetMuted(muted) => {
                if self.prefs.set_muted(muted) {
                    self.emit(PlaybackEvent::MutedChanged(muted));
                }
            }
            Command::SetPlaybackRate(rate) => {
                if self.prefs.set_playback_rate(rate) {
                    self.emit(PlaybackEvent::PlaybackRateChanged(rate));
                }
            }
            Command::SetAutoplay(autoplay) => self.prefs.autoplay = autoplay,
            Command::SetInitialBufferDuration(seconds) => {
                if self.prefs.set_initial_buffer_duration(seconds) {
                    self.reconcile();
                }
            }
            Command::SetQuality { quality, adaptive } => self.set_quality(quality, adaptive),
            Command::SetAutoQualityMode(enabled) => self.set_auto_quality(enabled),
            Command::SetAutoMaxBitrate(max) => {
                self.constraints.max_bitrate = max.filter(|b| *b > 0);
                self.apply_constraints();
            }
            Command::SetAutoMaxQuality(quality) => {
                self.constraints.max_bitrate = Some(quality.bitrate);
                self.apply_constraints();
            }
            Command::SetAutoMaxVideoSize { width, height } => {
                self.constraints.max_width = width.filter(|w| *w > 0);
                self.constraints.max_height = height.filter(|h| *h > 0);
                self.apply_constraints();
            }
            Command::SetLiveLowLatencyEnabled(enabled) => {
                if self.live.set_low_latency_enabled(enabled) {
                    self.reload();
                }
            }
            Command::SetRebufferToLive(enabled) => self.live.set_rebuffer_to_live(enabled),
            Command::SetLogLevel(level) => self.prefs.log_level = level,
        }
    }

    /// Apply one report from the outside world
    #[instrument(skip(self, signal), level = "trace")]
    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ManifestLoaded { request, result } => self.on_manifest(request, result),
            Signal::SegmentLoaded {
                request,
                result,
                elapsed,
            } => self.on_segment(request, result, elapsed),
            Signal::Clock(elapsed) => self.on_clock(elapsed),
            Signal::PositionReported(position) => self.on_position(position),
            Signal::BufferReported(ranges) => {
                let mut changed = false;
                for range in ranges {
                    changed |= self.buffer.add_range(range.start, range.end);
                }
                if changed {
                    self.emit(PlaybackEvent::BufferUpdate);
                }
                self.reconcile();
                self.pump();
            }
            Signal::RefreshDue => self.request_refresh(),
            Signal::PlaybackBlocked => self.on_playback_blocked(),
            Signal::AudioBlocked => {
                self.emit(PlaybackEvent::AudioBlocked);
                if self.prefs.set_muted(true) {
                    self.emit(PlaybackEvent::MutedChanged(true));
                }
            }
            Signal::NetworkUnavailable => self.emit(PlaybackEvent::NetworkUnavailable),
        }
    }

    /// Tear down for good: abandon all work, emit nothing
    pub fn shutdown(&mut self) {
        self.reset_stream();
        self.intent = PendingIntent::default();
        self.effects.retain(|e| !matches!(e, Effect::Emit(_)));
        player_log!(self, INFO, "Engine shut down");
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn load(&mut self, path: String, explicit_type: Option<String>) {
        player_log!(self, INFO, path = %path, media_type = ?explicit_type, "Loading source");
        self.reset_stream();

        // A rejected path reports ERROR before the IDLE it ends in
        if path.trim().is_empty() {
            self.fail(Error::NoSource);
            return;
        }
        let url = match Url::parse(path.trim()) {
            Ok(url) => url,
            Err(e) => {
                self.fail(Error::InvalidData(format!("source path '{path}': {e}")));
                return;
            }
        };
        let media_type = match MediaType::infer(&path, explicit_type.as_deref()) {
            Ok(media_type) => media_type,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.set_state(PlayerState::Idle);

        self.session = Some(PlaybackSession::new(SourceInfo {
            path,
            url: url.clone(),
            media_type,
            explicit_type,
        }));
        let request = self.next_request();
        self.manifest_fetch = Some((request, false));
        self.effects.push(Effect::FetchManifest {
            request,
            url,
            media_type,
        });
    }

    /// Fresh load of the current source, keeping intent
    fn reload(&mut self) {
        let Some(source) = self.session.as_ref().map(|s| s.source.clone()) else {
            return;
        };
        self.load(source.path, source.explicit_type);
    }

    fn play(&mut self) {
        self.intent.play = true;
        let ready = self.session.as_ref().is_some_and(|s| s.ready);
        if !ready {
            player_log!(self, DEBUG, "Play deferred until the source is ready");
            return;
        }
        match self.state {
            PlayerState::Idle | PlayerState::Ready | PlayerState::Ended => self.start_playback(),
            PlayerState::Buffering | PlayerState::Playing => {}
        }
    }

    fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.fail(Error::InvalidState("pause with no stream loaded".into()));
            return;
        };
        self.intent.play = false;
        if !session.ready {
            return;
        }
        session.paused = true;
        if matches!(self.state, PlayerState::Buffering | PlayerState::Playing) {
            self.set_state(PlayerState::Idle);
        }
    }

    fn start_playback(&mut self) {
        let restart = self.state == PlayerState::Ended;
        if let Some(session) = self.session.as_mut() {
            session.paused = false;
        }
        if restart {
            self.jump_to(0.0);
        }

        let position = self.position();
        let seeking = self.session.as_ref().is_some_and(|s| s.seeking.is_some());
        if !seeking && self.has_coverage(position) {
            self.set_state(PlayerState::Playing);
        } else {
            self.set_state(PlayerState::Buffering);
        }
        self.pump();
    }

    fn seek(&mut self, time: f64) {
        if !time.is_finite() {
            player_log!(self, DEBUG, time, "Ignoring non-finite seek");
            return;
        }
        let loaded = self.session.as_ref().is_some_and(|s| s.loaded);
        if !loaded {
            player_log!(self, DEBUG, time, "Seek recorded until the source is known");
            self.intent.seek = Some(time);
            return;
        }

        let target = self.clamp_seek(time);
        self.live.cancel_skip();
        self.cancel_segment();
        self.last_appended = None;
        self.jump_to(target);

        let ready = self.session.as_ref().is_some_and(|s| s.ready);
        if !ready {
            if let Some(session) = self.session.as_mut() {
                session.seeking = Some(target);
            }
            self.pump();
            return;
        }

        if self.has_coverage(target) {
            self.emit(PlaybackEvent::SeekCompleted(target));
            if self.intent.play {
                if self.state != PlayerState::Playing {
                    self.set_state(PlayerState::Playing);
                }
            } else if self.state == PlayerState::Ended {
                self.pause_session();
            }
        } else {
            if let Some(session) = self.session.as_mut() {
                session.seeking = Some(target);
            }
            if self.intent.play {
                self.set_state(PlayerState::Buffering);
            } else if self.state == PlayerState::Ended {
                self.pause_session();
            }
        }
        self.pump();
    }

    fn clamp_seek(&self, time: f64) -> f64 {
        let duration = self.session.as_ref().map(|s| s.duration).unwrap_or(0.0);
        self.clamp_seek_for(time, duration)
    }

    fn pause_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.paused = true;
        }
        self.set_state(PlayerState::Idle);
    }

    fn on_playback_blocked(&mut self) {
        self.emit(PlaybackEvent::PlaybackBlocked);
        self.intent.play = false;
        let ready = self.session.as_ref().is_some_and(|s| s.ready);
        if ready && matches!(self.state, PlayerState::Buffering | PlayerState::Playing) {
            self.pause_session();
        }
    }

    // ========================================================================
    // Quality control
    // ========================================================================

    fn set_quality(&mut self, quality: Quality, adaptive: bool) {
        let pinned = match self.catalog.pin(&quality, adaptive) {
            Ok(pinned) => pinned.clone(),
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if adaptive {
            if session.selected_quality.as_ref() != Some(&pinned) {
                session.selected_quality = Some(pinned.clone());
                session.pending_switch = Some(PendingSwitch {
                    quality: pinned,
                    at: None,
                });
            }
            return;
        }

        session.pending_switch = None;
        let fetch_changed = session.selected_quality.as_ref() != Some(&pinned);
        let play_changed = session.current_quality.as_ref() != Some(&pinned);
        session.selected_quality = Some(pinned.clone());
        session.current_quality = Some(pinned.clone());
        if fetch_changed {
            self.cancel_segment();
        }
        if play_changed {
            player_log!(self, INFO, quality = %pinned, "Quality switched immediately");
            self.emit(PlaybackEvent::QualityChanged(pinned));
        }
        self.pump();
    }

    fn set_auto_quality(&mut self, enabled: bool) {
        if enabled {
            self.catalog.unpin();
            if let Some(session) = self.session.as_mut() {
                session.pending_switch = None;
            }
            self.decide_quality();
            self.pump();
        } else if let Some(current) = self
            .session
            .as_ref()
            .and_then(|s| s.current_quality.clone())
        {
            self.set_quality(current, false);
        }
    }

    fn apply_constraints(&mut self) {
        self.catalog.constrain(self.constraints);
        if self.catalog.is_auto() {
            self.decide_quality();
            self.pump();
        }
    }

    /// Run ABR against the current selection and apply a change right away
    fn decide_quality(&mut self) {
        if !self.catalog.is_auto() || self.catalog.is_empty() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let buffer_ahead = self.buffer.playable_ahead(session.position);
        let candidates = self.catalog.candidates();
        let Some(decision) = self.abr.decide(
            &candidates,
            AbrContext {
                current: session.selected_quality.as_ref(),
                buffer_ahead,
            },
        ) else {
            return;
        };
        if !decision.changed {
            return;
        }

        player_log!(self, INFO, quality = %decision.quality, reason = ?decision.reason, "ABR switch");
        if let Some(session) = self.session.as_mut() {
            session.selected_quality = Some(decision.quality.clone());
            session.current_quality = Some(decision.quality.clone());
        }
        self.cancel_segment();
        self.emit(PlaybackEvent::QualityChanged(decision.quality));
    }

    // ========================================================================
    // Fetch completions
    // ========================================================================

    fn on_manifest(&mut self, request: RequestId, result: Result<SourceManifest, FetchError>) {
        let refresh = match self.manifest_fetch {
            Some((expected, refresh)) if expected == request => refresh,
            _ => {
                player_log!(self, DEBUG, request = request.0, "Discarding stale manifest");
                return;
            }
        };
        self.manifest_fetch = None;

        match (result, refresh) {
            (Err(error), false) => self.fail(Error::Fetch {
                source_name: "MasterPlaylist",
                error,
            }),
            (Err(error), true) => self.fail(Error::Fetch {
                source_name: "MediaPlaylist",
                error,
            }),
            (Ok(manifest), false) => self.on_source_loaded(manifest),
            (Ok(manifest), true) => self.on_refreshed(manifest),
        }
    }

    fn on_source_loaded(&mut self, manifest: SourceManifest) {
        if let Err(e) = manifest.validate() {
            self.fail(e);
            return;
        }
        let mut catalog = QualityCatalog::new(manifest.qualities().cloned(), self.device.as_ref());
        if catalog.is_empty() {
            self.fail(Error::NoPlayableQuality);
            return;
        }
        catalog.constrain(self.constraints);
        self.catalog = catalog;
        self.index = SegmentIndex::new(&manifest);

        let duration = if manifest.is_live {
            self.live.begin(
                LiveWindow {
                    start: self.index.window_start(),
                    edge: self.index.window_end(),
                    target_duration: manifest.target_duration,
                },
                manifest.low_latency_supported,
            );
            if self.live.refresh_interval().is_none() {
                self.fail(Error::InvalidData(format!(
                    "live target duration {} gives no usable refresh period",
                    manifest.target_duration
                )));
                return;
            }
            f64::INFINITY
        } else {
            self.index.window_end()
        };

        let initial = {
            let candidates = self.catalog.candidates();
            self.abr
                .decide(&candidates, AbrContext::default())
                .map(|d| d.quality)
        };
        let Some(initial) = initial else {
            self.fail(Error::NoPlayableQuality);
            return;
        };

        let start = self
            .intent
            .seek
            .take()
            .map(|time| self.clamp_seek_for(time, duration));
        let position = start
            .or_else(|| self.live.live_point())
            .unwrap_or(0.0);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.loaded = true;
        session.duration = duration;
        session.position = position;
        session.seeking = start;
        session.selected_quality = Some(initial.clone());
        session.current_quality = Some(initial.clone());

        player_log!(
            self,
            INFO,
            qualities = self.catalog.qualities().len(),
            is_live = manifest.is_live,
            duration,
            quality = %initial,
            "Source loaded"
        );
        self.emit(PlaybackEvent::DurationChanged(duration));
        self.emit(PlaybackEvent::QualityChanged(initial));
        self.schedule_refresh();
        self.pump();
        self.reconcile();
    }

    fn clamp_seek_for(&self, time: f64, duration: f64) -> f64 {
        if self.live.is_live() {
            self.live.clamp(time)
        } else {
            time.clamp(0.0, duration.max(0.0))
        }
    }

    fn on_refreshed(&mut self, manifest: SourceManifest) {
        self.index.merge(&manifest);
        if manifest.is_live {
            self.live.update_window(LiveWindow {
                start: self.index.window_start(),
                edge: self.index.window_end(),
                target_duration: manifest.target_duration,
            });
            self.schedule_refresh();
        } else {
            let duration = self.index.window_end();
            player_log!(self, INFO, duration, "Live stream ended");
            self.live.reset();
            if let Some(session) = self.session.as_mut() {
                session.duration = duration;
            }
            self.emit(PlaybackEvent::DurationChanged(duration));
        }
        self.pump();
        self.reconcile();
    }

    fn on_segment(&mut self, request: RequestId, result: Result<Bytes, FetchError>, elapsed: Duration) {
        let fetch = match self.segment_fetch.take() {
            Some(fetch) if fetch.request == request => fetch,
            other => {
                self.segment_fetch = other;
                player_log!(self, DEBUG, request = request.0, "Discarding stale segment");
                return;
            }
        };

        let data = match result {
            Ok(data) => data,
            Err(error) => {
                self.fail(Error::Fetch {
                    source_name: "Segment",
                    error,
                });
                return;
            }
        };
        self.abr.record(data.len() as u64, elapsed);

        let outcome = match self.sink.append(&fetch.segment, &fetch.quality, &data) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        player_log!(
            self,
            DEBUG,
            sequence = fetch.segment.sequence,
            quality = %fetch.quality,
            bytes = data.len(),
            "Segment appended"
        );
        self.last_appended = Some((fetch.segment.sequence, fetch.quality.clone()));

        let mut changed = false;
        for range in &outcome.buffered {
            changed |= self.buffer.add_range(range.start, range.end);
        }
        self.cues.insert(outcome.cues);

        if let Some(pending) = self
            .session
            .as_mut()
            .and_then(|s| s.pending_switch.as_mut())
        {
            if pending.at.is_none() && pending.quality == fetch.quality {
                pending.at = Some(fetch.segment.start);
            }
        }

        if changed {
            self.emit(PlaybackEvent::BufferUpdate);
        }
        self.reconcile();
        self.pump();
    }

    // ========================================================================
    // Clock
    // ========================================================================

    fn on_clock(&mut self, elapsed: Duration) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.ready {
            return;
        }
        let position = session.position;
        let duration = session.duration;

        let floor = position - self.config.back_buffer;
        if floor > 0.0 && self.buffer.evict(floor) {
            self.cues.evict(floor);
            self.emit(PlaybackEvent::BufferUpdate);
        }

        if self.state == PlayerState::Playing {
            let limit = if self.buffer.covers(position) {
                self.buffer.buffered_range(position).end
            } else {
                position
            };
            let step = elapsed.as_secs_f64() * self.prefs.playback_rate;
            let next = (position + step).min(limit).min(duration);
            self.advance_to(next);
        }
        self.reconcile();
        self.pump();
    }

    fn on_position(&mut self, reported: f64) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.ready || !reported.is_finite() {
            return;
        }
        if reported >= session.position {
            self.advance_to(reported);
        } else {
            self.jump_to(reported);
        }
        self.reconcile();
        self.pump();
    }

    /// Forward playback: deliver crossed cues, apply a due quality switch
    fn advance_to(&mut self, next: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.position;
        if next <= previous {
            return;
        }
        session.position = next;

        let due = matches!(
            &session.pending_switch,
            Some(PendingSwitch { at: Some(at), .. }) if *at <= next + COVERAGE_EPSILON
        );
        let switch = if due {
            session.pending_switch.take().map(|p| p.quality)
        } else {
            None
        };
        if let Some(quality) = switch.as_ref() {
            session.current_quality = Some(quality.clone());
        }

        self.emit(PlaybackEvent::TimeUpdate(next));
        for cue in self.cues.advance(previous, next) {
            self.emit(PlayerEvent::from_cue(cue));
        }
        if let Some(quality) = switch {
            player_log!(self, INFO, quality = %quality, "Adaptive quality switch reached playhead");
            self.emit(PlaybackEvent::QualityChanged(quality));
        }
    }

    /// Discontinuous move of the playhead; cues in between are not delivered
    fn jump_to(&mut self, target: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.position;
        session.position = target;
        self.cues.skip(previous, target);
        self.emit(PlaybackEvent::TimeUpdate(target));
    }

    // ========================================================================
    // State evaluation
    // ========================================================================

    fn position(&self) -> f64 {
        self.session.as_ref().map(|s| s.position).unwrap_or(0.0)
    }

    fn threshold(&self) -> f64 {
        let initial = if self.live.is_low_latency() {
            self.config
                .low_latency_initial_buffer_duration
                .min(self.prefs.initial_buffer_duration)
        } else {
            self.prefs.initial_buffer_duration
        };
        let started = self.session.as_ref().is_some_and(|s| s.started);
        if started {
            initial.min(self.config.rebuffer_threshold)
        } else {
            initial
        }
    }

    /// Enough media at `at` to play: the threshold ahead, or everything up to
    /// the end of on-demand content
    fn has_coverage(&self, at: f64) -> bool {
        if !self.buffer.covers(at) {
            return false;
        }
        if self.buffer.playable_ahead(at) + COVERAGE_EPSILON >= self.threshold() {
            return true;
        }
        let duration = self.session.as_ref().map(|s| s.duration).unwrap_or(0.0);
        duration.is_finite() && self.buffer.buffered_range(at).end >= duration - END_EPSILON
    }

    /// Move the state machine along after anything changed
    fn reconcile(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.loaded {
            return;
        }
        let position = session.position;

        if !session.ready {
            if self.has_coverage(position) {
                self.become_ready();
            }
            return;
        }

        if session.seeking.is_some() {
            if !self.has_coverage(position) {
                return;
            }
            if let Some(session) = self.session.as_mut() {
                session.seeking = None;
            }
            self.emit(PlaybackEvent::SeekCompleted(position));
            if self.state == PlayerState::Buffering && self.intent.play {
                self.set_state(PlayerState::Playing);
            }
            return;
        }

        // The skip only ever moves forward; until the window passes the
        // playhead, recovery in place is still possible
        if self.state == PlayerState::Buffering && self.live.skip_pending() {
            if let Some(live_point) = self.skip_target(position) {
                if self.has_coverage(live_point) {
                    self.live.take_skip();
                    player_log!(self, INFO, from = position, to = live_point, "Rebuffer recovered at live point");
                    self.jump_to(live_point);
                    if self.intent.play {
                        self.set_state(PlayerState::Playing);
                    }
                }
                return;
            }
        }

        match self.state {
            PlayerState::Buffering if self.intent.play && self.has_coverage(position) => {
                self.live.cancel_skip();
                self.set_state(PlayerState::Playing);
            }
            PlayerState::Playing => {
                let at_end = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.at_end(END_EPSILON));
                if at_end {
                    self.intent.play = false;
                    self.set_state(PlayerState::Ended);
                } else if self.buffer.playable_ahead(position) <= COVERAGE_EPSILON {
                    self.rebuffer();
                }
            }
            _ => {}
        }
    }

    /// Live point, if a rebuffer-to-live skip is armed and it lies ahead
    fn skip_target(&self, position: f64) -> Option<f64> {
        if !self.live.skip_pending() {
            return None;
        }
        self.live
            .live_point()
            .filter(|live_point| *live_point > position + COVERAGE_EPSILON)
    }

    fn become_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let id = session.mark_ready();
        let seek = session.seeking.take();
        let position = session.position;
        player_log!(self, INFO, session_id = %id, position, "Session ready");

        self.set_state(PlayerState::Ready);
        if seek.is_some() {
            self.emit(PlaybackEvent::SeekCompleted(position));
        }
        if self.prefs.autoplay {
            self.intent.play = true;
        }
        if self.intent.play {
            self.start_playback();
        }
    }

    fn rebuffer(&mut self) {
        let started = self.session.as_ref().is_some_and(|s| s.started);
        player_log!(self, WARN, position = self.position(), "Buffer depleted");
        self.set_state(PlayerState::Buffering);
        if started {
            self.emit(PlaybackEvent::Rebuffering);
        }
        if self.live.on_rebuffer() {
            self.last_appended = None;
        }
        self.pump();
    }

    fn set_state(&mut self, target: PlayerState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            player_log!(self, WARN, from = %self.state, to = %target, "Refusing invalid state transition");
            return;
        }
        player_log!(self, INFO, from = %self.state, to = %target, "State transition");
        self.state = target;
        if target == PlayerState::Playing {
            if let Some(session) = self.session.as_mut() {
                session.started = true;
                session.paused = false;
            }
        }
        self.emit(target);
    }

    // ========================================================================
    // Fetch scheduling
    // ========================================================================

    /// Issue the next segment fetch if one is due
    fn pump(&mut self) {
        if self.segment_fetch.is_some() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.loaded {
            return;
        }

        let anchor = self
            .skip_target(session.position)
            .unwrap_or(session.position);
        let covered = self.buffer.covers(anchor);
        let from = if covered {
            self.buffer.buffered_range(anchor).end
        } else {
            anchor
        };
        if from - anchor >= self.config.max_buffer_ahead {
            return;
        }

        self.decide_quality();

        let Some(quality) = self
            .session
            .as_ref()
            .and_then(|s| s.selected_quality.clone())
        else {
            return;
        };
        let segment = match self.index.segment_after(&quality, from) {
            Some(segment) => segment.clone(),
            // A playhead parked on the very end still needs the final segment
            None if !covered => match self.index.last_segment(&quality) {
                Some(last) if (last.end() - from).abs() <= END_EPSILON => last.clone(),
                _ => return,
            },
            None => return,
        };
        if self.last_appended.as_ref() == Some(&(segment.sequence, quality.clone())) {
            return;
        }

        let request = self.next_request();
        player_log!(
            self,
            DEBUG,
            request = request.0,
            sequence = segment.sequence,
            quality = %quality,
            "Fetching segment"
        );
        self.effects.push(Effect::FetchSegment {
            request,
            uri: segment.uri.clone(),
        });
        self.segment_fetch = Some(SegmentFetch {
            request,
            segment,
            quality,
        });
    }

    fn cancel_segment(&mut self) {
        if let Some(fetch) = self.segment_fetch.take() {
            player_log!(self, DEBUG, request = fetch.request.0, "Abandoning segment fetch");
            self.effects.push(Effect::Cancel(fetch.request));
        }
    }

    fn schedule_refresh(&mut self) {
        if !self.live.is_live() {
            return;
        }
        match self.live.refresh_interval() {
            Some(interval) => self.effects.push(Effect::ScheduleRefresh(interval)),
            None => self.fail(Error::InvalidData(
                "live target duration gives no usable refresh period".into(),
            )),
        }
    }

    fn request_refresh(&mut self) {
        if !self.live.is_live() || self.manifest_fetch.is_some() {
            return;
        }
        let Some(source) = self.session.as_ref().map(|s| s.source.clone()) else {
            return;
        };
        let request = self.next_request();
        self.manifest_fetch = Some((request, true));
        self.effects.push(Effect::FetchManifest {
            request,
            url: source.url,
            media_type: source.media_type,
        });
    }

    fn next_request(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    // ========================================================================
    // Teardown and errors
    // ========================================================================

    /// Discard all stream-scoped state
    fn reset_stream(&mut self) {
        let busy = self.session.is_some()
            || self.manifest_fetch.is_some()
            || self.segment_fetch.is_some();
        if busy {
            self.effects.push(Effect::CancelAll);
            self.effects.push(Effect::CancelRefresh);
        }
        self.session = None;
        self.manifest_fetch = None;
        self.segment_fetch = None;
        self.last_appended = None;
        self.buffer.clear();
        self.catalog = QualityCatalog::default();
        self.index = SegmentIndex::default();
        self.cues.clear();
        self.live.reset();
        self.sink.reset();
    }

    /// Report an error. Fatal ones reset the session first and end in IDLE.
    fn fail(&mut self, error: Error) {
        let payload = error.to_player_error("Player");
        if !error.is_fatal() {
            player_log!(self, WARN, code = error.error_code(), error = %error, "Player error");
            self.emit(PlaybackEvent::Error(payload));
            return;
        }

        player_log!(self, ERROR, code = error.error_code(), error = %error, "Fatal playback error");
        self.reset_stream();
        self.intent = PendingIntent::default();
        self.emit(PlaybackEvent::Error(payload));
        self.set_state(PlayerState::Idle);
    }

    fn emit(&mut self, event: impl Into<PlayerEvent>) {
        self.effects.push(Effect::Emit(event.into()));
    }
}
