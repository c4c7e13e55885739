//! PCM server listener
//!
//! Binds the TCP socket, runs the accept loop and drives the server
//! lifecycle: start the acceptor and the broadcast loop, wait for shutdown,
//! then tear everything down once.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::decoder::AudioDecoder;
use crate::error::{Error, Result};
use crate::registry::{ClientRegistry, ConsumerHandle};
use crate::server::broadcast::{BroadcastLoop, StopReason};
use crate::server::config::ServerConfig;
use crate::server::shutdown::{shutdown_signal, RunState};
use crate::stats::StatsSnapshot;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Where consumer connections come from
///
/// [`TcpListener`] is the production source.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Conn: AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next connection
    async fn accept(&mut self) -> io::Result<(Self::Conn, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Apply socket options before the connection is registered
    fn configure(&self, _conn: &Self::Conn, _tcp_nodelay: bool) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionSource for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn configure(&self, conn: &TcpStream, tcp_nodelay: bool) -> io::Result<()> {
        if tcp_nodelay {
            conn.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Accepts connections and registers each one as a consumer
pub struct Acceptor<L: ConnectionSource = TcpListener> {
    listener: L,
    registry: Arc<ClientRegistry>,
    run_state: RunState,
    tcp_nodelay: bool,
}

impl<L: ConnectionSource> Acceptor<L> {
    pub fn new(
        listener: L,
        registry: Arc<ClientRegistry>,
        run_state: RunState,
        tcp_nodelay: bool,
    ) -> Self {
        Self {
            listener,
            registry,
            run_state,
            tcp_nodelay,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown is requested, then close the listening socket
    pub async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.run_state.stopped() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    if self.run_state.is_stopping() {
                        tracing::debug!(peer = %peer_addr, "Connection refused: shutting down");
                        break;
                    }
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) if self.run_state.is_stopping() => {
                    tracing::debug!(error = %e, "Accept failed during shutdown");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::debug!("Acceptor stopped");
    }

    async fn handle_connection(&self, socket: L::Conn, peer_addr: SocketAddr) {
        if let Err(e) = self.listener.configure(&socket, self.tcp_nodelay) {
            tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
            return;
        }

        let id = self
            .registry
            .add(ConsumerHandle::new(socket).with_peer(peer_addr))
            .await;

        tracing::debug!(consumer_id = %id, peer = %peer_addr, "Client connected");
    }
}

/// Live PCM fan-out server
///
/// Owns the registry and the run state. Serving consumes the server, so its
/// teardown runs exactly once.
pub struct PcmServer {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    run_state: RunState,
}

impl PcmServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ClientRegistry::with_write_timeout(config.write_timeout));
        Self {
            config,
            registry,
            run_state: RunState::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the client registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Run state shared with the acceptor and the broadcast loop
    ///
    /// Calling [`RunState::stop`] on a clone shuts the server down.
    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    /// Bind the listening socket
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.config.listen_backlog)?)
    }

    /// Run until SIGINT/SIGTERM or a decoder failure
    pub async fn run<D: AudioDecoder>(self, decoder: D) -> Result<StatsSnapshot> {
        self.run_until(decoder, shutdown_signal()).await
    }

    /// Run with graceful shutdown
    pub async fn run_until<D, F>(self, decoder: D, shutdown: F) -> Result<StatsSnapshot>
    where
        D: AudioDecoder,
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        let listener = self.bind()?;
        self.serve(listener, decoder, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// Returns when `shutdown` resolves, [`RunState::stop`] is called or the
    /// decoder fails. A decoder failure is returned as [`Error::Decode`].
    pub async fn serve<D, F>(
        self,
        listener: TcpListener,
        decoder: D,
        shutdown: F,
    ) -> Result<StatsSnapshot>
    where
        D: AudioDecoder,
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let local_addr = listener.local_addr()?;
        let format = decoder.format();
        match format {
            Some(format) => tracing::info!(
                addr = %local_addr,
                chunk_size = self.config.chunk_size,
                format = %format,
                "PCM server listening"
            ),
            None => tracing::info!(
                addr = %local_addr,
                chunk_size = self.config.chunk_size,
                "PCM server listening"
            ),
        }

        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&self.registry),
            self.run_state.clone(),
            self.config.tcp_nodelay,
        );
        let accept_handle = tokio::spawn(acceptor.run());

        let mut broadcast = BroadcastLoop::new(
            decoder,
            self.config.chunk_size,
            Arc::clone(&self.registry),
            self.run_state.clone(),
        );
        if let Some(format) = format.filter(|_| self.config.realtime) {
            broadcast = broadcast.with_realtime_pacing(format);
        }
        let mut broadcast_handle = tokio::spawn(broadcast.run());

        let finished = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                None
            }
            _ = self.run_state.stopped() => None,
            joined = &mut broadcast_handle => Some(joined),
        };

        self.run_state.stop();
        let outcome = match finished {
            Some(joined) => joined?,
            None => broadcast_handle.await?,
        };

        // The listening socket closes when the acceptor returns
        if let Err(e) = accept_handle.await {
            tracing::warn!(error = %e, "Acceptor task failed");
        }

        self.teardown().await;

        match outcome.reason {
            StopReason::Shutdown => Ok(self.registry.stats().snapshot()),
            StopReason::SourceFailed(e) => Err(Error::Decode(e)),
        }
    }

    async fn teardown(&self) {
        // The broadcast loop already drained the registry; this catches
        // anything registered while it was stopping.
        let late = self.registry.drain().await;
        if late > 0 {
            tracing::debug!(consumers = late, "Closed late consumers");
        }

        let stats = self.registry.stats().snapshot();
        tracing::info!(
            consumers_added = stats.consumers_added,
            consumers_pruned = stats.consumers_pruned,
            sweeps = stats.sweeps,
            bytes_delivered = stats.bytes_delivered,
            rewinds = stats.rewinds,
            uptime_secs = stats.uptime.as_secs(),
            "PCM server stopped"
        );
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
