//! RTP audio sender
//!
//! Captures the microphone (after an optional announcement) and streams it
//! as Opus over RTP/UDP until Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_audio_source::{
    audio::{device::list_input_devices, CpalBackend},
    codec::{OpusCodec, OpusConfig},
    config::{default_config_path, AudioConfig, TxMode},
    filter::GainFactory,
    network::{NetworkConfig, RtpSender},
    Session,
};

/// Stream a microphone as RTP
#[derive(Parser, Debug)]
#[command(name = "sender")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults to the per-user config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device name
    #[arg(short, long)]
    device: Option<String>,

    /// WAV file to play before the microphone
    #[arg(short, long)]
    announcement: Option<PathBuf>,

    /// Destination address, e.g. 239.0.0.1:5004
    #[arg(long)]
    dest: Option<SocketAddr>,

    /// Scheduling discipline
    #[arg(long, value_enum)]
    txmode: Option<Mode>,

    /// Linear gain applied before encoding
    #[arg(long)]
    gain: Option<f32>,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Poll,
    Thread,
}

impl From<Mode> for TxMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Poll => TxMode::Poll,
            Mode::Thread => TxMode::Thread,
        }
    }
}

/// Everything the sender reads from its configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SenderConfig {
    audio: AudioConfig,
    opus: OpusConfig,
    network: NetworkConfig,
}

impl SenderConfig {
    fn load(explicit: Option<&PathBuf>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.clone(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::info!("no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        println!("\n=== Capture Devices ===");
        for device in list_input_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        return Ok(());
    }

    let mut config = SenderConfig::load(args.config.as_ref())?;
    if let Some(device) = args.device {
        config.audio.src_dev = device;
    }
    if let Some(path) = args.announcement {
        config.audio.announcement = Some(path);
    }
    if let Some(dest) = args.dest {
        config.network.destination = dest;
    }
    if let Some(mode) = args.txmode {
        config.audio.txmode = mode.into();
    }
    config.audio.validate().context("invalid audio configuration")?;

    let mut sender = RtpSender::new(&config.network).context("creating RTP sender")?;

    let mut builder = Session::builder(config.audio.clone())
        .codec(Arc::new(OpusCodec::new(config.opus.clone())))
        .backend(Arc::new(CpalBackend::new()))
        .on_send(move |ext_len, marker, ts, buffer| sender.send(ext_len, marker, ts, buffer))
        .on_announcement_end(|| tracing::info!("announcement finished, streaming microphone"));
    if let Some(gain) = args.gain {
        builder = builder.filter(Arc::new(GainFactory(gain)));
    }

    let mut session = builder.start().context("starting audio source")?;
    tracing::info!("Streaming to {} - press Ctrl+C to stop", config.network.destination);

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    tracing::info!("Shutting down");

    session.stop();
    let stats = session.stats();
    tracing::info!(
        "sent {} packets ({} deferred, {} dropped, {} ring overflow samples), timestamp offset {}",
        stats.packets_sent,
        stats.frames_deferred,
        stats.frames_dropped,
        stats.ring_overflows,
        stats.timestamp_offset
    );

    Ok(())
}
