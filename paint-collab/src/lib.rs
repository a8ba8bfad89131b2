//! # paint-collab: History synchronization for collaborative drawing
//!
//! Keeps the command logs of several drawing sessions in agreement by
//! exchanging hashes first and commands only where the logs differ.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (dials)     │     Binary Proto    │ (accepts)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │ PeerEvent                         │ PeerEvent
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Session     │                     │ Session     │
//! │ (owner task)│                     │ (owner task)│
//! └──────┬──────┘                     └──────┬──────┘
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │HistoryWorker│                     │HistoryWorker│
//! │ DrawHistory │                     │ DrawHistory │
//! └─────────────┘                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Binary wire protocol (bincode-encoded Package)
//! - [`peer`] - Connected peers and fan-out
//! - [`worker`] - Divergence detection and reconciliation
//! - [`session`] - Event loop owning the history
//! - [`transport`] - WebSocket connection loop shared by both ends
//! - [`server`] - Accepting side
//! - [`client`] - Dialing side

pub mod protocol;
pub mod peer;
pub mod worker;
pub mod session;
pub mod transport;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{CommandsRange, Package, PackageType, ProtocolError};
pub use peer::{PeerChannel, PeerId, PeerSet, PeerStats};
pub use worker::{
    HistoryWorker, ReconcileReport, RejectedCommand, ResponseRouting, WorkerConfig,
    WorkerError, diff_position,
};
pub use session::{
    HistorySnapshot, PeerEvent, Session, SessionConfig, SessionError, SessionEvent,
    SessionHandle,
};
pub use transport::TransportError;
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{ClientConfig, ConnectionState, SyncClient};
