//! Sable CLI - Headless Playback Driver
//!
//! Features:
//! - Simulated sessions against scripted in-memory sources
//! - Real sessions against HLS over HTTP
//! - Event stream as text or JSON lines
//! - Quality ladder summary

use clap::{Args, Parser, Subcommand};
use sable_core::types::LogLevel;
use sable_core::PlayerConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;
mod fixture;
mod output;

use output::OutputFormat;

/// Sable CLI - Adaptive playback driver
#[derive(Parser)]
#[command(name = "sable-cli")]
#[command(version)]
#[command(about = "Drive the Sable playback engine headlessly", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Engine log level (debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Player configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a scripted in-memory source
    Simulate {
        /// Fixture describing the source (JSON)
        fixture: PathBuf,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Play an HLS stream over HTTP
    Play {
        /// URL of the master playlist
        url: String,

        /// Explicit media type, e.g. application/x-mpegURL
        #[arg(long)]
        media_type: Option<String>,

        #[command(flatten)]
        run: RunOptions,
    },
}

/// Options shared by every playback command
#[derive(Args, Debug, Clone)]
pub struct RunOptions {
    /// Seconds to keep playing (0 = until the stream ends)
    #[arg(short, long, default_value = "30")]
    pub duration: u64,

    /// Cap ABR at this bitrate (bits per second)
    #[arg(long)]
    pub max_bitrate: Option<u64>,

    /// Resume at the live point after a rebuffer
    #[arg(long)]
    pub rebuffer_to_live: bool,

    /// Prefer low-latency delivery for live streams (true/false)
    #[arg(long)]
    pub low_latency: Option<bool>,

    /// Seek here (seconds) once loaded
    #[arg(long)]
    pub seek: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = init_tracing(&cli)?;
    sable_core::init();

    let format = OutputFormat::from(cli.format.as_str());
    let mut config = load_config(cli.config.as_deref())?;
    if cli.log_level.is_some() || cli.verbose {
        config.log_level = level;
    }

    match cli.command {
        Commands::Simulate { fixture, run } => {
            commands::simulate(&fixture, &run, config, format).await?;
        }
        Commands::Play { url, media_type, run } => {
            commands::play(&url, media_type.as_deref(), &run, config, format).await?;
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) -> anyhow::Result<LogLevel> {
    let level = match (&cli.log_level, cli.verbose) {
        (Some(level), _) => level.parse::<LogLevel>()?,
        (None, true) => LogLevel::Debug,
        (None, false) => LogLevel::Warn,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sable_cli={}", level.directive(), level.as_str())));

    // Logs go to stderr so event output on stdout stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(level)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PlayerConfig> {
    let Some(path) = path else {
        return Ok(PlayerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    let config: PlayerConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}
