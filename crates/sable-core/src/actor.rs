//! Player actor
//!
//! One tokio task per player. It owns the [`Engine`], applies user commands
//! and render reports in arrival order, runs fetches on a [`JoinSet`] and feeds
//! their completions back as signals. After every step the engine's effects
//! are carried out and the committed snapshot is republished.

use crate::engine::{Command, Effect, Engine, RequestId, Signal, Snapshot};
use crate::error::FetchError;
use crate::events::EventBus;
use crate::manifest::MediaType;
use crate::transport::Transport;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

/// Messages accepted by the actor
#[derive(Debug)]
pub(crate) enum Message {
    Command(Command),
    Signal(Signal),
    /// Reply once everything sent before has been applied
    Flush(oneshot::Sender<()>),
    /// Tear down, reply, exit
    Delete(oneshot::Sender<()>),
}

pub(crate) struct Actor {
    engine: Engine,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    snapshot: watch::Sender<Snapshot>,
    inbox: mpsc::UnboundedReceiver<Message>,
    fetches: JoinSet<Signal>,
    in_flight: HashMap<RequestId, AbortHandle>,
    refresh_at: Option<Instant>,
    request_timeout: Duration,
    tick_interval: Option<Duration>,
}

impl Actor {
    pub(crate) fn new(
        engine: Engine,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        snapshot: watch::Sender<Snapshot>,
        inbox: mpsc::UnboundedReceiver<Message>,
        request_timeout: Duration,
        tick_interval: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            transport,
            bus,
            snapshot,
            inbox,
            fetches: JoinSet::new(),
            in_flight: HashMap::new(),
            refresh_at: None,
            request_timeout,
            tick_interval,
        }
    }

    /// Run until deleted or every handle is dropped
    pub(crate) async fn run(mut self) {
        info!(transport = self.transport.name(), "Player actor started");
        let mut ticker = self.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut last_tick = Instant::now();

        self.apply_effects();

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(Message::Command(command)) => self.engine.handle_command(command),
                    Some(Message::Signal(signal)) => self.engine.handle_signal(signal),
                    Some(Message::Flush(done)) => {
                        let _ = done.send(());
                    }
                    Some(Message::Delete(done)) => {
                        self.teardown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    match joined {
                        Ok(signal) => {
                            if let Some(request) = completed_request(&signal) {
                                self.in_flight.remove(&request);
                            }
                            self.engine.handle_signal(signal);
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!(error = %e, "Fetch task failed"),
                    }
                }
                _ = wait_until(self.refresh_at) => {
                    self.refresh_at = None;
                    self.engine.handle_signal(Signal::RefreshDue);
                }
                now = next_tick(&mut ticker) => {
                    let elapsed = now.saturating_duration_since(last_tick);
                    last_tick = now;
                    self.engine.handle_signal(Signal::Clock(elapsed));
                }
            }
            self.apply_effects();
        }

        info!("Player actor stopped");
    }

    fn apply_effects(&mut self) {
        // Getters must already reflect a step when its events arrive
        let next = self.engine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        for effect in self.engine.drain() {
            match effect {
                Effect::FetchManifest {
                    request,
                    url,
                    media_type,
                } => self.fetch_manifest(request, url, media_type),
                Effect::FetchSegment { request, uri } => self.fetch_segment(request, uri),
                Effect::Cancel(request) => {
                    if let Some(handle) = self.in_flight.remove(&request) {
                        handle.abort();
                    }
                }
                Effect::CancelAll => {
                    self.fetches.abort_all();
                    self.in_flight.clear();
                }
                Effect::ScheduleRefresh(after) => {
                    debug!(after_ms = after.as_millis() as u64, "Manifest refresh scheduled");
                    self.refresh_at = Instant::now().checked_add(after);
                    if self.refresh_at.is_none() {
                        warn!(?after, "Refresh period out of range; not scheduled");
                    }
                }
                Effect::CancelRefresh => self.refresh_at = None,
                Effect::Emit(event) => self.bus.publish(event),
            }
        }
    }

    fn fetch_manifest(&mut self, request: RequestId, url: Url, media_type: MediaType) {
        let transport = Arc::clone(&self.transport);
        let limit = self.request_timeout;
        let handle = self.fetches.spawn(async move {
            let result = with_timeout(limit, transport.fetch_manifest(&url, media_type), &url).await;
            Signal::ManifestLoaded { request, result }
        });
        self.in_flight.insert(request, handle);
    }

    fn fetch_segment(&mut self, request: RequestId, uri: Url) {
        let transport = Arc::clone(&self.transport);
        let limit = self.request_timeout;
        let handle = self.fetches.spawn(async move {
            let started = Instant::now();
            let result = with_timeout(limit, transport.fetch_segment(&uri), &uri).await;
            Signal::SegmentLoaded {
                request,
                result,
                elapsed: started.elapsed(),
            }
        });
        self.in_flight.insert(request, handle);
    }

    fn teardown(&mut self) {
        self.engine.shutdown();
        // Only cancellations are left after shutdown
        for effect in self.engine.drain() {
            if !matches!(effect, Effect::CancelAll | Effect::CancelRefresh) {
                warn!(?effect, "Dropping effect during teardown");
            }
        }
        self.fetches.abort_all();
        self.in_flight.clear();
        self.refresh_at = None;
    }
}

fn completed_request(signal: &Signal) -> Option<RequestId> {
    match signal {
        Signal::ManifestLoaded { request, .. } | Signal::SegmentLoaded { request, .. } => {
            Some(*request)
        }
        _ => None,
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fetch: impl Future<Output = Result<T, FetchError>>,
    url: &Url,
) -> Result<T, FetchError> {
    match tokio::time::timeout(limit, fetch).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::timeout(format!(
            "{url} did not answer within {} ms",
            limit.as_millis()
        ))),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}
