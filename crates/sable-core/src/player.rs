//! Player façade
//!
//! [`Player`] is the public handle. Every mutating call is enqueued to the
//! player's actor and applied in arrival order; getters read the snapshot the
//! actor committed after its last step. Use [`Player::flush`] to wait until
//! earlier calls are reflected in the getters.

use crate::actor::{Actor, Message};
use crate::config::PlayerConfig;
use crate::engine::{Command, Engine, Signal, Snapshot};
use crate::events::{EventBus, EventName, EventSubscription, PlayerEvent};
use crate::quality::{AnyDevice, DeviceCapabilities};
use crate::transport::{MediaSink, TimelineSink, Transport};
use crate::types::{BufferRange, LogLevel, PlayerState, Quality, SessionId};
use crate::{Error, Result, VERSION};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Adaptive bitrate player
///
/// Must be created inside a tokio runtime.
pub struct Player {
    commands: mpsc::UnboundedSender<Message>,
    bus: EventBus,
    /// Receiver opened before `INITIALIZED` was published
    first_receiver: Mutex<Option<broadcast::Receiver<PlayerEvent>>>,
    snapshot: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl Player {
    /// Player with a timeline sink and no device restrictions
    pub fn new(transport: Arc<dyn Transport>, config: PlayerConfig) -> Result<Self> {
        Self::with_components(
            transport,
            config,
            Box::new(TimelineSink::new()),
            Box::new(AnyDevice),
        )
    }

    /// Player with a custom render sink and device capability check
    pub fn with_components(
        transport: Arc<dyn Transport>,
        config: PlayerConfig,
        sink: Box<dyn MediaSink>,
        device: Box<dyn DeviceCapabilities>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.event_capacity);
        let first_receiver = bus.subscribe();
        let request_timeout = config.request_timeout();
        let tick_interval = config.tick_interval();

        let engine = Engine::new(config, sink, device);
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot());
        let (commands, inbox) = mpsc::unbounded_channel();

        let actor = Actor::new(
            engine,
            transport,
            bus.clone(),
            snapshot_tx,
            inbox,
            request_timeout,
            tick_interval,
        );
        let task = tokio::spawn(actor.run());
        info!(version = VERSION, "Player created");

        Ok(Self {
            commands,
            bus,
            first_receiver: Mutex::new(Some(first_receiver)),
            snapshot,
            task,
        })
    }

    pub(crate) fn send(&self, command: Command) {
        if self.commands.send(Message::Command(command)).is_err() {
            warn!("Player actor is gone; command dropped");
        }
    }

    /// Committed state after the actor's last step
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.snapshot.borrow())
    }

    /// Library version
    pub fn version(&self) -> &'static str {
        VERSION
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// All events. The first subscriber also sees `INITIALIZED`.
    pub fn subscribe(&self) -> EventSubscription {
        self.receiver().into()
    }

    /// Only the named events
    pub fn subscribe_to(&self, names: impl IntoIterator<Item = EventName>) -> EventSubscription {
        EventSubscription::filtered(self.receiver(), names)
    }

    fn receiver(&self) -> broadcast::Receiver<PlayerEvent> {
        let stored = self
            .first_receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        stored.unwrap_or_else(|| self.bus.subscribe())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load a source. `media_type` is a MIME type; inferred from the path
    /// when omitted.
    #[instrument(skip(self))]
    pub fn load(&self, path: &str, media_type: Option<&str>) {
        self.send(Command::Load {
            path: path.to_string(),
            media_type: media_type.map(str::to_string),
        });
    }

    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn seek_to(&self, time: f64) {
        self.send(Command::SeekTo(time));
    }

    /// Wait until every earlier call has been applied
    pub async fn flush(&self) -> Result<()> {
        let (done, applied) = oneshot::channel();
        self.commands
            .send(Message::Flush(done))
            .map_err(|_| Error::Deleted)?;
        applied.await.map_err(|_| Error::Deleted)
    }

    /// Tear the player down. Pending fetches are cancelled, no further events
    /// are delivered and every subscription ends.
    pub async fn delete(self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Message::Delete(done)).is_ok() {
            let _ = finished.await;
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Player actor ended abnormally");
        }
        debug!("Player deleted");
    }

    /// Handle for the render layer to report playback progress
    pub fn render_handle(&self) -> RenderHandle {
        RenderHandle {
            commands: self.commands.clone(),
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn state(&self) -> PlayerState {
        self.snapshot.borrow().state
    }

    pub fn position(&self) -> f64 {
        self.snapshot.borrow().position
    }

    /// Seconds; infinite for live, zero before a source is loaded
    pub fn duration(&self) -> f64 {
        self.snapshot.borrow().duration
    }

    /// Paused by the user with a session retained
    pub fn is_paused(&self) -> bool {
        self.snapshot.borrow().paused
    }

    pub fn is_live(&self) -> bool {
        self.snapshot.borrow().live
    }

    /// Assigned when the current session became ready
    pub fn session_id(&self) -> Option<SessionId> {
        self.snapshot.borrow().session_id
    }

    /// Bandwidth estimate in bits per second
    pub fn bandwidth_estimate(&self) -> Option<u64> {
        self.snapshot.borrow().bandwidth_estimate
    }

    // ========================================================================
    // Volume and rate
    // ========================================================================

    pub fn volume(&self) -> f64 {
        self.snapshot.borrow().volume
    }

    /// Values outside [0, 1] are ignored
    pub fn set_volume(&self, volume: f64) {
        self.send(Command::SetVolume(volume));
    }

    pub fn is_muted(&self) -> bool {
        self.snapshot.borrow().muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(Command::SetMuted(muted));
    }

    pub fn playback_rate(&self) -> f64 {
        self.snapshot.borrow().playback_rate
    }

    /// Values outside [0.25, 2.0] are ignored
    pub fn set_playback_rate(&self, rate: f64) {
        self.send(Command::SetPlaybackRate(rate));
    }

    pub fn autoplay(&self) -> bool {
        self.snapshot.borrow().autoplay
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        self.send(Command::SetAutoplay(autoplay));
    }

    pub fn initial_buffer_duration(&self) -> f64 {
        self.snapshot.borrow().initial_buffer_duration
    }

    /// Values outside [0.1, 5] seconds are ignored
    pub fn set_initial_buffer_duration(&self, seconds: f64) {
        self.send(Command::SetInitialBufferDuration(seconds));
    }

    pub fn log_level(&self) -> LogLevel {
        self.snapshot.borrow().log_level
    }

    /// Threshold for this player's engine diagnostics. The global subscriber
    /// still filters on top.
    pub fn set_log_level(&self, level: LogLevel) {
        self.send(Command::SetLogLevel(level));
    }
}

/// Reports from the decode/render layer
#[derive(Debug, Clone)]
pub struct RenderHandle {
    commands: mpsc::UnboundedSender<Message>,
}

impl RenderHandle {
    fn signal(&self, signal: Signal) {
        if self.commands.send(Message::Signal(signal)).is_err() {
            debug!("Render report after teardown ignored");
        }
    }

    /// Current playhead as rendered
    pub fn report_position(&self, position: f64) {
        self.signal(Signal::PositionReported(position));
    }

    /// Time ranges the decoder can play
    pub fn report_buffered(&self, ranges: Vec<BufferRange>) {
        self.signal(Signal::BufferReported(ranges));
    }

    /// Autoplay policy refused to start playback
    pub fn playback_blocked(&self) {
        self.signal(Signal::PlaybackBlocked);
    }

    /// Autoplay policy refused audio; playback continues muted
    pub fn audio_blocked(&self) {
        self.signal(Signal::AudioBlocked);
    }

    pub fn network_unavailable(&self) {
        self.signal(Signal::NetworkUnavailable);
    }
}

/// Checks a requested quality against the committed catalog
pub(crate) fn known_quality(snapshot: &Snapshot, quality: &Quality) -> Result<()> {
    if snapshot.qualities.iter().any(|q| q == quality) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "quality {quality} is not offered by the current source"
        )))
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.borrow();
        f.debug_struct("Player")
            .field("state", &snapshot.state)
            .field("position", &snapshot.position)
            .field("session_id", &snapshot.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn ladder() -> Vec<Quality> {
        vec![
            Quality::new("360p", "avc1.4d401e", 800_000, 640, 360),
            Quality::new("720p", "avc1.4d401f", 2_500_000, 1280, 720),
        ]
    }

    fn player() -> Player {
        let transport = MemoryTransport::vod(ladder(), 2.0, 50);
        Player::new(Arc::new(transport), PlayerConfig::external_clock()).unwrap()
    }

    #[tokio::test]
    async fn test_first_subscriber_sees_initialized() {
        let player = player();
        let mut events = player.subscribe();
        let first = events.recv().await.unwrap();
        assert_eq!(first.name(), EventName::Initialized);
        player.delete().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PlayerConfig {
            rebuffer_threshold: 0.0,
            ..PlayerConfig::default()
        };
        let transport = MemoryTransport::vod(ladder(), 2.0, 5);
        assert!(matches!(
            Player::new(Arc::new(transport), config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_setters_visible_after_flush() {
        let player = player();
        player.set_volume(0.25);
        player.set_muted(true);
        player.set_playback_rate(1.5);
        player.set_log_level(LogLevel::Debug);
        player.flush().await.unwrap();
        assert_eq!(player.volume(), 0.25);
        assert!(player.is_muted());
        assert_eq!(player.playback_rate(), 1.5);
        assert_eq!(player.log_level(), LogLevel::Debug);
        player.delete().await;
    }

    #[tokio::test]
    async fn test_delete_closes_subscriptions() {
        let player = player();
        let mut events = player.subscribe_to([EventName::VolumeChanged]);
        let render = player.render_handle();
        player.delete().await;
        assert!(events.recv().await.is_none());
        // Reports after teardown are dropped quietly
        render.report_position(3.0);
    }

    #[test]
    fn test_known_quality() {
        let snapshot = Snapshot {
            qualities: ladder(),
            ..Engine::new(
                PlayerConfig::default(),
                Box::new(TimelineSink::new()),
                Box::new(AnyDevice),
            )
            .snapshot()
        };
        assert!(known_quality(&snapshot, &ladder()[1]).is_ok());
        let missing = Quality::new("1080p", "avc1", 5_000_000, 1920, 1080);
        assert!(matches!(
            known_quality(&snapshot, &missing),
            Err(Error::InvalidParameter(_))
        ));
    }
}
