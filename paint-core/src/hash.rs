//! Hashes summarizing the applied region of a history.
//!
//! ```text
//!   applied:        A        B        C
//!                   │        │        │      xxh3(memento bytes)
//!                   ▼        ▼        ▼
//!   command_hashes: hA       hB       hC
//!                   └──┬─────┴──┬─────┘
//!                      ▼        ▼            xxh3 streamed in order
//!   total_hash:   H(hA ‖ hB ‖ hC)
//! ```
//!
//! Peers only exchange `total_hash` until it differs; then the hash list is
//! enough to find the first index where the logs disagree.
//!
//! Both hashes are xxh3-64 over fixed little-endian field bytes, so they are
//! the same on every host and in every process.

use xxhash_rust::xxh3::Xxh3;

use crate::canvas::Canvas;
use crate::command::CommandMemento;
use crate::history::DrawHistory;

/// Per-command hashes and the order-sensitive total of a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryHash {
    command_hashes: Vec<u64>,
    total_hash: u64,
}

impl HistoryHash {
    /// Hashes of an empty history.
    pub fn new() -> Self {
        Self {
            command_hashes: Vec::new(),
            total_hash: total_hash(&[]),
        }
    }

    /// Hash the given history right away.
    pub fn of<C: Canvas>(history: &DrawHistory<C>) -> Self {
        let mut hash = Self::new();
        hash.calculate(history);
        hash
    }

    /// Recompute from the commands currently applied.
    pub fn calculate<C: Canvas>(&mut self, history: &DrawHistory<C>) {
        self.command_hashes.clear();
        self.command_hashes
            .extend(history.applied().map(|command| command_hash(&command.memento())));
        self.total_hash = total_hash(&self.command_hashes);
        log::trace!(
            "History hash recalculated: {} commands, total {:016x}",
            self.command_hashes.len(),
            self.total_hash
        );
    }

    /// Whether a peer's total hash matches ours.
    pub fn is_valid(&self, candidate: u64) -> bool {
        candidate == self.total_hash
    }

    pub fn command_hashes(&self) -> &[u64] {
        &self.command_hashes
    }

    pub fn total_hash(&self) -> u64 {
        self.total_hash
    }

    pub fn len(&self) -> usize {
        self.command_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_hashes.is_empty()
    }
}

impl Default for HistoryHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable hash of one command's kind and state.
pub fn command_hash(memento: &CommandMemento) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&[memento.kind]);
    hasher.update(&memento.pen.color);
    hasher.update(&memento.pen.width.to_le_bytes());
    // Length prefix keeps point lists from running into each other
    hasher.update(&(memento.points.len() as u64).to_le_bytes());
    for point in &memento.points {
        hasher.update(&point.x.to_le_bytes());
        hasher.update(&point.y.to_le_bytes());
    }
    hasher.digest()
}

/// Running fold over an ordered hash sequence. Swapping two entries changes
/// the result.
pub fn total_hash(command_hashes: &[u64]) -> u64 {
    let mut hasher = Xxh3::new();
    for hash in command_hashes {
        hasher.update(&hash.to_le_bytes());
    }
    hasher.digest()
}
