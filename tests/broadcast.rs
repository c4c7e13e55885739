//! End-to-end tests over loopback TCP

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use pcmcast::client::PcmReceiver;
use pcmcast::decoder::{FileDecoder, MemoryDecoder};
use pcmcast::stats::StatsSnapshot;
use pcmcast::{
    AudioChunk, AudioDecoder, ChunkStatus, ClientRegistry, DecodeError, PcmServer, RunState,
    ServerConfig,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Decoder fed one chunk at a time by the test
///
/// Blocks in `next_chunk` until the test sends the next block. A dropped
/// sender reads as end of stream.
struct FedDecoder {
    rx: std_mpsc::Receiver<Vec<u8>>,
}

impl AudioDecoder for FedDecoder {
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
        match self.rx.recv() {
            Ok(block) => {
                chunk.fill(&block);
                Ok(ChunkStatus::Ready)
            }
            Err(_) => Ok(ChunkStatus::EndOfStream),
        }
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Decoder that holds its first chunk until released
struct GatedDecoder {
    gate: Option<std_mpsc::Receiver<()>>,
    inner: MemoryDecoder,
}

impl AudioDecoder for GatedDecoder {
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        self.inner.next_chunk(chunk)
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.inner.rewind()
    }
}

struct Running {
    addr: std::net::SocketAddr,
    registry: Arc<ClientRegistry>,
    run_state: RunState,
    handle: JoinHandle<pcmcast::Result<StatsSnapshot>>,
}

fn start<D: AudioDecoder>(config: ServerConfig, decoder: D) -> Running {
    let server = PcmServer::new(config);
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::clone(server.registry());
    let run_state = server.run_state().clone();
    let handle = tokio::spawn(server.serve(listener, decoder, std::future::pending::<()>()));

    Running {
        addr,
        registry,
        run_state,
        handle,
    }
}

fn config(chunk_size: usize) -> ServerConfig {
    ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
        .chunk_size(chunk_size)
        .write_timeout(Duration::from_secs(5))
}

async fn wait_for_consumers(registry: &ClientRegistry, count: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while registry.len().await < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumers did not register");
}

async fn recv(receiver: &mut PcmReceiver, len: usize) -> Option<Bytes> {
    tokio::time::timeout(TIMEOUT, receiver.recv_exact(len))
        .await
        .expect("timed out waiting for PCM")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumers_see_looping_sequence() {
    let (gate_tx, gate_rx) = std_mpsc::channel();
    let decoder = GatedDecoder {
        gate: Some(gate_rx),
        inner: MemoryDecoder::new(vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]]),
    };
    let server = start(config(4), decoder);

    let mut first = PcmReceiver::connect(server.addr, 4).await.unwrap();
    let mut second = PcmReceiver::connect(server.addr, 4).await.unwrap();
    wait_for_consumers(&server.registry, 2).await;
    gate_tx.send(()).unwrap();

    let expected: Vec<u8> = [1u8, 2, 3, 1, 2, 3, 1, 2, 3]
        .iter()
        .flat_map(|&n| [n; 4])
        .collect();

    let (a, b) = tokio::join!(
        recv(&mut first, expected.len()),
        recv(&mut second, expected.len())
    );
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);

    server.run_state.stop();
    let stats = server.handle.await.unwrap().unwrap();
    assert_eq!(stats.consumers_added, 2);
    assert!(stats.rewinds >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_joiner_starts_mid_stream() {
    let (feed, rx) = std_mpsc::channel();
    let server = start(config(4), FedDecoder { rx });

    let mut early = PcmReceiver::connect(server.addr, 4).await.unwrap();
    wait_for_consumers(&server.registry, 1).await;

    feed.send(vec![1u8; 4]).unwrap();
    assert_eq!(recv(&mut early, 4).await.unwrap(), vec![1u8; 4]);
    feed.send(vec![2u8; 4]).unwrap();
    assert_eq!(recv(&mut early, 4).await.unwrap(), vec![2u8; 4]);

    let mut late = PcmReceiver::connect(server.addr, 4).await.unwrap();
    wait_for_consumers(&server.registry, 2).await;

    feed.send(vec![3u8; 4]).unwrap();
    assert_eq!(recv(&mut early, 4).await.unwrap(), vec![3u8; 4]);
    assert_eq!(recv(&mut late, 4).await.unwrap(), vec![3u8; 4]);

    feed.send(vec![4u8; 4]).unwrap();
    assert_eq!(recv(&mut late, 4).await.unwrap(), vec![4u8; 4]);
    assert_eq!(recv(&mut early, 4).await.unwrap(), vec![4u8; 4]);

    // Unblocks the decoder if the loop is waiting on it
    server.run_state.stop();
    let _ = feed.send(vec![5u8; 4]);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_sequence() {
    let (feed, rx) = std_mpsc::channel();
    let server = start(config(4), FedDecoder { rx });

    let mut a = PcmReceiver::connect(server.addr, 4).await.unwrap();
    let mut b = PcmReceiver::connect(server.addr, 4).await.unwrap();
    wait_for_consumers(&server.registry, 2).await;

    feed.send(vec![1u8; 4]).unwrap();
    assert_eq!(recv(&mut a, 4).await.unwrap(), vec![1u8; 4]);
    assert_eq!(recv(&mut b, 4).await.unwrap(), vec![1u8; 4]);

    let stats = server.registry.stats();
    tokio::time::timeout(TIMEOUT, async {
        while stats.snapshot().sweeps < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let sweeps_before_stop = stats.snapshot().sweeps;

    // The loop is blocked on the decoder; stopping lets it finish that read
    // and its sweep, then exit
    server.run_state.stop();
    let _ = feed.send(vec![2u8; 4]);
    let _ = feed.send(vec![3u8; 4]);

    let stats = tokio::time::timeout(TIMEOUT, server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(stats.sweeps <= sweeps_before_stop + 1);
    assert!(server.registry.is_empty().await);
    assert!(server.registry.is_closed().await);

    // Consumers got at most the in-flight chunk, then end of stream
    for receiver in [&mut a, &mut b] {
        let mut rest = Vec::new();
        while let Some(pcm) = tokio::time::timeout(TIMEOUT, receiver.recv())
            .await
            .unwrap()
            .unwrap()
        {
            rest.extend_from_slice(&pcm);
        }
        assert!(rest.is_empty() || rest == vec![2u8; 4]);
    }

    // No new connections after shutdown
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnected_consumer_is_pruned() {
    let (feed, rx) = std_mpsc::channel();
    let server = start(
        config(64 * 1024).write_timeout(Duration::from_millis(500)),
        FedDecoder { rx },
    );

    let mut stays = PcmReceiver::connect(server.addr, 4096).await.unwrap();
    let leaves = TcpStream::connect(server.addr).await.unwrap();
    wait_for_consumers(&server.registry, 2).await;
    drop(leaves);

    // Writes to a closed peer fail within a few chunks (RST, then EPIPE)
    let block = vec![9u8; 64 * 1024];
    let pruned = tokio::time::timeout(TIMEOUT, async {
        loop {
            feed.send(block.clone()).unwrap();
            recv(&mut stays, block.len()).await.unwrap();
            if server.registry.stats().snapshot().consumers_pruned == 1 {
                break;
            }
        }
    })
    .await;
    assert!(pruned.is_ok(), "closed consumer was never pruned");
    assert_eq!(server.registry.len().await, 1);

    server.run_state.stop();
    let _ = feed.send(block);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decoder_failure_stops_server() {
    struct Broken;

    impl AudioDecoder for Broken {
        fn next_chunk(&mut self, _chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
            Err(DecodeError::Corrupt("truncated frame".to_string()))
        }

        fn rewind(&mut self) -> Result<(), DecodeError> {
            Ok(())
        }
    }

    let server = start(config(4), Broken);
    let result = tokio::time::timeout(TIMEOUT, server.handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(pcmcast::Error::Decode(_))));
    assert!(server.run_state.is_stopping());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serves_decoded_file_in_a_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.wav");

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let mut pcm = Vec::new();
    for i in 0..2000i32 {
        let sample = ((i * 97) % 30_000) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(-sample).unwrap();
        pcm.extend_from_slice(&sample.to_le_bytes());
        pcm.extend_from_slice(&(-sample).to_le_bytes());
    }
    writer.finalize().unwrap();

    let decoder = FileDecoder::open(&path).unwrap();
    let server = start(config(1024), decoder);

    let mut receiver = PcmReceiver::connect(server.addr, 4096).await.unwrap();
    wait_for_consumers(&server.registry, 1).await;

    // More than two passes of the file
    let received = recv(&mut receiver, pcm.len() * 2 + 512).await.unwrap();

    // Whatever chunk we joined at, the bytes follow the looping file exactly
    let looped = pcm.repeat(4);
    let joined_at = (0..pcm.len())
        .step_by(4)
        .find(|&offset| looped[offset..offset + received.len()] == received[..]);
    assert!(joined_at.is_some(), "received PCM does not match the source");

    server.run_state.stop();
    let stats = server.handle.await.unwrap().unwrap();
    assert!(stats.rewinds >= 2);
}

#[tokio::test]
async fn test_port_in_use() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let server = PcmServer::new(ServerConfig::with_addr(addr));
    let result = server
        .run_until(
            MemoryDecoder::new(vec![vec![0u8; 4]]),
            std::future::pending::<()>(),
        )
        .await;

    assert!(matches!(result, Err(pcmcast::Error::Io(_))));
}
