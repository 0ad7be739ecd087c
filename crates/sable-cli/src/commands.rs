//! CLI command implementations

use crate::fixture::Fixture;
use crate::output::{event_line, ladder_table, OutputFormat};
use crate::RunOptions;
use sable_core::prelude::*;
use sable_core::{AnyDevice, PlayerConfig, TimelineSink};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

/// Play a scripted in-memory source
pub async fn simulate(
    fixture_path: &Path,
    options: &RunOptions,
    config: PlayerConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let fixture = Fixture::load(fixture_path)?;
    let transport = fixture.transport();
    let driver = fixture.drive_live(transport.clone());

    let player = Player::with_components(
        Arc::new(transport.clone()),
        apply_options(config, options),
        Box::new(TimelineSink::with_cues(fixture.cues.clone())),
        Box::new(AnyDevice),
    )?;
    let manifest = format!("memory://{}/master.m3u8", fixture_stem(fixture_path));
    let outcome = run(player, &manifest, None, options, format).await;

    if let Some(driver) = driver {
        driver.abort();
    }
    info!(
        manifests = transport.manifest_requests(),
        segments = transport.segment_requests(),
        "Simulation finished"
    );
    outcome
}

/// Play an HLS stream over HTTP
pub async fn play(
    url: &str,
    media_type: Option<&str>,
    options: &RunOptions,
    config: PlayerConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let url = Url::parse(url)?;
    let transport = sable_core::HttpTransport::new(config.request_timeout())?;
    let player = Player::new(Arc::new(transport), apply_options(config, options))?;
    run(player, url.as_str(), media_type, options, format).await
}

fn apply_options(mut config: PlayerConfig, options: &RunOptions) -> PlayerConfig {
    if options.rebuffer_to_live {
        config.live.rebuffer_to_live = true;
    }
    if let Some(enabled) = options.low_latency {
        config.live.low_latency_enabled = enabled;
    }
    config
}

fn fixture_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("fixture")
        .to_string()
}

/// Load, play and print events until the stream ends, fails, or time runs out
async fn run(
    player: Player,
    path: &str,
    media_type: Option<&str>,
    options: &RunOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut events = player.subscribe();

    if let Some(bitrate) = options.max_bitrate {
        player.set_auto_max_bitrate(bitrate);
    }
    player.load(path, media_type);
    player.play();

    let deadline = (options.duration > 0)
        .then(|| Instant::now() + Duration::from_secs(options.duration));
    let mut pending_seek = options.seek;
    let mut failure = None;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = sleep_until(deadline) => {
                info!("Run time elapsed");
                break;
            }
        };
        let Some(event) = event else { break };
        println!("{}", event_line(&event, player.position(), format));

        match &event {
            PlayerEvent::State(PlayerState::Ready) => {
                if let Some(target) = pending_seek.take() {
                    player.seek_to(target);
                }
            }
            PlayerEvent::State(PlayerState::Ended) => break,
            PlayerEvent::Playback(PlaybackEvent::Error(error)) => failure = Some(error.clone()),
            // A fatal error returns the player to idle
            PlayerEvent::State(PlayerState::Idle) if failure.is_some() => break,
            _ => {}
        }
    }

    player.flush().await?;
    summarize(&player, format);
    player.delete().await;

    match failure {
        Some(error) if error.error_type != sable_core::ErrorType::InvalidState => {
            warn!(%error, "Playback failed");
            Err(anyhow::anyhow!("playback failed: {error}"))
        }
        _ => Ok(()),
    }
}

fn summarize(player: &Player, format: OutputFormat) {
    let qualities = player.qualities();
    let active = player.quality();
    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "state": player.state().as_str(),
                "position": player.position(),
                "bufferDuration": player.buffer_duration(),
                "bandwidthEstimate": player.bandwidth_estimate(),
                "quality": active,
                "qualities": qualities,
            });
            println!("{summary}");
        }
        OutputFormat::Text => {
            println!();
            println!("State:     {}", player.state());
            println!("Position:  {:.2}s", player.position());
            println!("Buffered:  {:.2}s ahead", player.buffer_duration());
            match player.bandwidth_estimate() {
                Some(bps) => println!("Bandwidth: {:.0} kbps", bps as f64 / 1000.0),
                None => println!("Bandwidth: no estimate"),
            }
            if qualities.is_empty() {
                println!("No qualities loaded");
            } else {
                println!("{}", ladder_table(&qualities, active.as_ref()));
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
