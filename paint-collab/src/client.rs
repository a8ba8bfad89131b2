//! Outbound WebSocket connection to another session.
//!
//! Dials a peer's [`SyncServer`](crate::server::SyncServer) and registers the
//! connection with the local session. The dialing side waits for the
//! accepting side's hash instead of starting synchronization itself, so both
//! ends never pull from each other at once.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::session::{PeerEvent, SessionHandle};
use crate::transport::{self, TransportError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer to dial, e.g. `ws://127.0.0.1:9090`
    pub url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090".to_string(),
        }
    }
}

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    state: Arc<RwLock<ConnectionState>>,
}

impl SyncClient {
    /// Create a client feeding the given session.
    pub fn new(config: ClientConfig, session: &SessionHandle) -> Self {
        Self {
            config,
            peer_events: session.peer_events(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    /// Dial the peer.
    ///
    /// Returns once the handshake is done; the connection is then served by
    /// a background task until either side closes it.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.config.url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                log::error!("Failed to connect to {}: {e}", self.config.url);
                return Err(e.into());
            }
        };

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.config.url);

        let url = self.config.url.clone();
        let peer_events = self.peer_events.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::run_connection(ws_stream, url.clone(), false, peer_events).await {
                log::error!("Connection to {url} failed: {e}");
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    /// Get current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}
