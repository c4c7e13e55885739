//! pcmcast - stream an audio file as raw PCM to every TCP client
//!
//! ```text
//! pcmcast track.mp3 --port 5016
//! nc localhost 5016 | aplay -f S16_LE -c 2 -r 44100 -t raw
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pcmcast::decoder::FileDecoder;
use pcmcast::server::config::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use pcmcast::{AudioDecoder, PcmServer, ServerConfig};

/// Command-line arguments for pcmcast
#[derive(Parser, Debug)]
#[command(name = "pcmcast")]
#[command(about = "Broadcast an audio file as raw PCM to every connected TCP client")]
#[command(version)]
struct Args {
    /// Audio file to stream (MP3, FLAC, Vorbis, WAV, AAC)
    source: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PCMCAST_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "PCMCAST_BIND")]
    bind: IpAddr,

    /// Bytes of PCM per broadcast chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "PCMCAST_CHUNK_SIZE")]
    chunk_size: usize,

    /// Drop a client whose write takes longer than this (milliseconds)
    #[arg(long, default_value_t = 2000, env = "PCMCAST_WRITE_TIMEOUT_MS")]
    write_timeout_ms: u64,

    /// Decode as fast as clients accept instead of at playback speed
    #[arg(long)]
    no_realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcmcast=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig::with_addr(SocketAddr::new(args.bind, args.port))
        .chunk_size(args.chunk_size)
        .write_timeout(Duration::from_millis(args.write_timeout_ms))
        .realtime(!args.no_realtime);
    config.validate().context("Invalid configuration")?;

    let decoder = FileDecoder::open(&args.source)
        .with_context(|| format!("Cannot open {}", args.source.display()))?;

    if let Some(format) = decoder.format() {
        info!(
            source = %args.source.display(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Source format: 16-bit signed little-endian PCM"
        );
    }

    let server = PcmServer::new(config);
    let stats = server
        .run(decoder)
        .await
        .context("Broadcast terminated")?;

    info!(
        consumers = stats.consumers_added,
        pruned = stats.consumers_pruned,
        bytes = stats.bytes_delivered,
        "Shut down cleanly"
    );

    Ok(())
}
