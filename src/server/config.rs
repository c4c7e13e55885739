//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::registry::DEFAULT_WRITE_TIMEOUT;

/// Default listening port
pub const DEFAULT_PORT: u16 = 5016;

/// Bytes of PCM per broadcast chunk
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Smallest accepted chunk size
pub const MIN_CHUNK_SIZE: usize = 1;

/// Largest accepted chunk size (1 MiB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Bytes per broadcast chunk, fixed for the lifetime of the server
    pub chunk_size: usize,

    /// Longest a single consumer write may take before the consumer is dropped
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Pending connection queue length
    pub listen_backlog: u32,

    /// Pace the broadcast to the source's playback rate when it is known
    pub realtime: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            tcp_nodelay: true, // Important for low latency
            listen_backlog: 5,
            realtime: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set only the port, keeping the bind IP
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.min(MAX_CHUNK_SIZE);
        self
    }

    /// Set consumer write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted connections
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set the listen backlog
    pub fn listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = backlog.max(1);
        self
    }

    /// Enable or disable real-time pacing
    pub fn realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    /// Check the values a server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
