//! WebSocket listener that turns accepted connections into session peers.
//!
//! ```text
//! Peer A ──┐                 ┌── run_connection ──┐
//!          ├── TcpListener ──┤                    ├── PeerEvent ──► session
//! Peer B ──┘                 └── run_connection ──┘
//! ```
//!
//! The accepting side starts synchronization, so a fresh peer receives our
//! total hash right after the handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::session::{PeerEvent, SessionHandle};
use crate::transport::{self, TransportError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Connections beyond this are refused
    pub max_peers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers: 64,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
}

/// One counted connection, held from before the handshake until the socket
/// is done.
struct PeerSlot<'a> {
    stats: &'a AtomicServerStats,
}

impl<'a> PeerSlot<'a> {
    fn reserve(stats: &'a AtomicServerStats, max_peers: u64) -> Option<Self> {
        let taken = stats.active_connections.fetch_add(1, Ordering::AcqRel);
        if taken >= max_peers {
            stats.active_connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self { stats })
    }
}

impl Drop for PeerSlot<'_> {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Create a server feeding the given session.
    pub fn new(config: ServerConfig, session: &SessionHandle) -> Self {
        Self {
            config,
            peer_events: session.peer_events(),
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let peer_events = self.peer_events.clone();
            let stats = self.stats.clone();
            let max_peers = self.config.max_peers as u64;

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, peer_events, stats, max_peers).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
        stats: Arc<AtomicServerStats>,
        max_peers: u64,
    ) -> Result<(), TransportError> {
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        let Some(_slot) = PeerSlot::reserve(&stats, max_peers) else {
            stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
            log::warn!("Refusing {addr}: {max_peers} peers already connected");
            return Err(TransportError::TooManyPeers);
        };

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        transport::run_connection(ws_stream, addr.to_string(), true, peer_events).await
    }

    /// Get server statistics.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.stats.rejected_connections.load(Ordering::Relaxed),
        }
    }
}
