//! PCM client example
//!
//! Connects to a pcmcast server and writes the raw stream to stdout.
//!
//! Run with: cargo run --example pcm_client [ADDR]
//!
//! Examples:
//!   cargo run --example pcm_client | aplay -f S16_LE -c 2 -r 44100 -t raw
//!   cargo run --example pcm_client 10.0.0.5:5016 | paplay --raw --format=s16le --channels=2 --rate=48000

use tokio::io::AsyncWriteExt;

use pcmcast::client::PcmReceiver;

const CHUNK: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the audio
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pcmcast=info".parse()?),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5016".to_string());

    let mut receiver = PcmReceiver::connect(addr.as_str(), CHUNK).await?;
    eprintln!("[*] streaming from {} ... Ctrl-C to stop", addr);

    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            pcm = receiver.recv() => match pcm? {
                Some(pcm) => stdout.write_all(&pcm).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[*] shutting down");
                break;
            }
        }
    }

    stdout.flush().await?;
    eprintln!("[*] received {} bytes", receiver.bytes_received());
    Ok(())
}
