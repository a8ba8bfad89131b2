//! Binary packages of the history sync protocol.
//!
//! Wire format (bincode-encoded, one package per WebSocket binary frame):
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ package_type │ payload                      │
//! │ 1 variant    │ length-prefixed typed body   │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! | Type                  | Body                                |
//! |-----------------------|-------------------------------------|
//! | HistoryHashUpdate     | total hash `u64`                    |
//! | CommandHashesRequest  | empty                               |
//! | CommandHashesResponse | `Vec<u64>` per-command hashes       |
//! | CommandsRequest       | from position `u64`                 |
//! | CommandsResponse      | `CommandsRange` (mementos + from)   |

use paint_core::CommandMemento;
use serde::{Deserialize, Serialize};

/// Package types of the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackageType {
    /// Total hash of the sender's applied history
    HistoryHashUpdate = 1,
    /// Ask for the per-command hash list
    CommandHashesRequest = 2,
    /// Per-command hash list
    CommandHashesResponse = 3,
    /// Ask for applied commands from a position on
    CommandsRequest = 4,
    /// Applied commands from a position on
    CommandsResponse = 5,
}

/// Body of a commands response: the sender's applied commands starting at
/// `from_position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsRange {
    pub commands: Vec<CommandMemento>,
    pub from_position: u64,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub package_type: PackageType,
    /// Package body (varies by package_type)
    pub payload: Vec<u8>,
}

impl Package {
    /// Announce our total hash.
    pub fn hash_update(total_hash: u64) -> Self {
        Self::with_body(PackageType::HistoryHashUpdate, &total_hash)
    }

    /// Ask peers for their per-command hashes.
    pub fn hashes_request() -> Self {
        Self {
            package_type: PackageType::CommandHashesRequest,
            payload: Vec::new(),
        }
    }

    /// Our per-command hashes.
    pub fn hashes_response(command_hashes: &[u64]) -> Self {
        Self::with_body(PackageType::CommandHashesResponse, &command_hashes)
    }

    /// Ask for applied commands starting at `from_position`.
    pub fn commands_request(from_position: u64) -> Self {
        Self::with_body(PackageType::CommandsRequest, &from_position)
    }

    /// Applied commands starting at `from_position`.
    pub fn commands_response(commands: Vec<CommandMemento>, from_position: u64) -> Self {
        let range = CommandsRange {
            commands,
            from_position,
        };
        Self::with_body(PackageType::CommandsResponse, &range)
    }

    /// Bodies are integers, `Vec`s and derived structs of them. Bincode's
    /// serde encoder only fails on unsized sequences or custom `Serialize`
    /// errors, neither of which these bodies have, so the fallback is never
    /// taken.
    fn with_body<T: Serialize>(package_type: PackageType, body: &T) -> Self {
        let payload = bincode::serde::encode_to_vec(body, bincode::config::standard())
            .unwrap_or_default();
        Self {
            package_type,
            payload,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (package, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(package)
    }

    /// Parse a hash update body.
    pub fn total_hash(&self) -> Result<u64, ProtocolError> {
        self.body(PackageType::HistoryHashUpdate)
    }

    /// Parse a hashes response body.
    pub fn command_hashes(&self) -> Result<Vec<u64>, ProtocolError> {
        self.body(PackageType::CommandHashesResponse)
    }

    /// Parse a commands request body.
    pub fn from_position(&self) -> Result<u64, ProtocolError> {
        self.body(PackageType::CommandsRequest)
    }

    /// Parse a commands response body.
    pub fn commands_range(&self) -> Result<CommandsRange, ProtocolError> {
        self.body(PackageType::CommandsResponse)
    }

    fn body<T: serde::de::DeserializeOwned>(&self, expected: PackageType) -> Result<T, ProtocolError> {
        if self.package_type != expected {
            return Err(ProtocolError::InvalidPackageType);
        }
        let (body, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(body)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidPackageType,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidPackageType => write!(f, "Invalid package type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
