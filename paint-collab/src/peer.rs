//! Connected peers and fan-out of encoded packages.
//!
//! Each peer is an ordered unbounded channel drained by that connection's
//! writer task. The set is owned by the session task, so no locking is
//! needed; sends never block the protocol.
//!
//! ```text
//!              ┌─────────┐     Bytes      ┌───────────────┐
//! package ───► │ PeerSet │ ─────────────► │ writer task A │ ──► socket
//!  (encode     │         │ ─────────────► │ writer task B │ ──► socket
//!   once)      └─────────┘                └───────────────┘
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{Package, ProtocolError};

/// Identifies one connection.
pub type PeerId = Uuid;

/// Outbound half of a peer connection.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    pub id: PeerId,
    /// Remote address or URL, for logging
    pub label: String,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PeerChannel {
    /// Create a channel with a fresh id. The receiver goes to the writer task.
    pub fn new(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            id: Uuid::new_v4(),
            label: label.into(),
            tx,
        };
        (channel, rx)
    }

    /// Queue encoded bytes. Fails once the writer task is gone.
    pub fn write(&self, bytes: Bytes) -> Result<(), ProtocolError> {
        self.tx.send(bytes).map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct PeerStats {
    pub packages_sent: u64,
    pub peers_dropped: u64,
    pub active_peers: usize,
}

/// The peers a worker talks to.
#[derive(Default)]
pub struct PeerSet {
    peers: HashMap<PeerId, PeerChannel>,
    packages_sent: u64,
    peers_dropped: u64,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Re-adding an id replaces its channel.
    pub fn add(&mut self, channel: PeerChannel) {
        log::debug!("Peer {} ({}) added", channel.id, channel.label);
        self.peers.insert(channel.id, channel);
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerChannel> {
        let removed = self.peers.remove(peer_id);
        if removed.is_some() {
            log::debug!("Peer {peer_id} removed");
        }
        removed
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Send a package to one peer. A peer whose writer is gone is removed.
    pub fn send_to(&mut self, peer_id: &PeerId, package: &Package) -> Result<(), ProtocolError> {
        let encoded = Bytes::from(package.encode()?);
        let Some(peer) = self.peers.get(peer_id) else {
            return Err(ProtocolError::ConnectionClosed);
        };
        if let Err(e) = peer.write(encoded) {
            log::warn!("Dropping peer {peer_id}: {e}");
            self.drop_peers(&[*peer_id]);
            return Err(e);
        }
        self.packages_sent += 1;
        Ok(())
    }

    /// Send a package to every peer. The package is encoded once; peers
    /// whose channel is closed are removed after the loop.
    ///
    /// Returns the number of peers that accepted the package.
    pub fn broadcast(&mut self, package: &Package) -> Result<usize, ProtocolError> {
        let encoded = Bytes::from(package.encode()?);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, peer) in &self.peers {
            match peer.write(encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(*id),
            }
        }

        if !failed.is_empty() {
            log::warn!("Dropping {} closed peer(s) after broadcast", failed.len());
            self.drop_peers(&failed);
        }
        self.packages_sent += delivered as u64;
        Ok(delivered)
    }

    fn drop_peers(&mut self, ids: &[PeerId]) {
        for id in ids {
            if self.peers.remove(id).is_some() {
                self.peers_dropped += 1;
            }
        }
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            packages_sent: self.packages_sent,
            peers_dropped: self.peers_dropped,
            active_peers: self.peers.len(),
        }
    }
}

impl std::fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSet").field("peers", &self.ids()).finish()
    }
}
