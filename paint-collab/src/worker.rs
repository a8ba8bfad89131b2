//! History synchronization worker.
//!
//! Owns one session's history, its hash tracker and the connected peers, and
//! runs the reconciliation protocol against them.
//!
//! ```text
//!   local                                   remote
//!   ─────                                   ──────
//!   edit ─► HistoryHashUpdate(total) ─────► hash matches? done
//!                                           │ no
//!        ◄───────────── CommandHashesRequest┘
//!   CommandHashesResponse(hashes) ────────► first differing index p
//!                                           │ none? done
//!        ◄───────────── CommandsRequest(p) ─┘
//!   CommandsResponse(applied[p..], p) ────► pop to p, push, rehash
//! ```
//!
//! The exchange is stateless request/response: every step re-derives what it
//! needs from the current history, so a fresh hash update can start a new
//! cycle at any time. The receiver of a hash update converges on the
//! sender's log; nothing is merged. When a reconcile overwrites local
//! commands and lowers the total hash, the worker announces the new hash,
//! which settles peers that edited concurrently on the lower-hash log.

use paint_core::{
    Canvas, CommandError, CommandFactory, DrawHistory, HistoryChange, HistoryHash, SceneCanvas,
};
use tokio::sync::mpsc;

use crate::peer::{PeerChannel, PeerId, PeerSet};
use crate::protocol::{CommandsRange, Package, PackageType, ProtocolError};

/// Where the packages of a sync cycle go. Hash updates announcing a local
/// change are always broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseRouting {
    /// Requests and responses are fanned out to all peers
    #[default]
    Broadcast,
    /// Requests and responses only go to the peer whose package caused them
    Unicast,
}

/// Worker configuration.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub routing: ResponseRouting,
}

/// A remote command that could not be rebuilt locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCommand {
    /// Log position the command would have taken
    pub position: usize,
    pub error: CommandError,
}

/// Outcome of applying a commands response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub from_position: usize,
    /// Local commands removed to reach `from_position`
    pub popped: usize,
    /// Remote commands appended
    pub applied: usize,
    /// Remote commands that failed to rebuild. Nothing after the first
    /// failure is appended, so the log never skips a position.
    pub failed: Vec<RejectedCommand>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Worker errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    Protocol(ProtocolError),
    /// A commands response starts past the end of our applied history
    PositionOutOfRange { position: u64, len: usize },
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::PositionOutOfRange { position, len } => {
                write!(f, "Position {position} is out of range for history of length {len}")
            }
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<ProtocolError> for WorkerError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// First index at which `remote` stops agreeing with `local`. An empty
/// remote list always starts over at 0; otherwise identical lists give `None`.
pub fn diff_position(local: &[u64], remote: &[u64]) -> Option<usize> {
    if remote.is_empty() {
        // Remote has nothing: it wants everything we have
        return Some(0);
    }
    if let Some(index) = local.iter().zip(remote).position(|(l, r)| l != r) {
        return Some(index);
    }
    (local.len() != remote.len()).then(|| local.len().min(remote.len()))
}

/// Protocol core of one drawing session.
pub struct HistoryWorker<C: Canvas = SceneCanvas> {
    history: DrawHistory<C>,
    changes: mpsc::UnboundedReceiver<HistoryChange>,
    hash: HistoryHash,
    peers: PeerSet,
    factory: CommandFactory,
    config: WorkerConfig,
}

impl HistoryWorker<SceneCanvas> {
    /// Worker over an empty in-memory history with the built-in commands.
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_history(DrawHistory::new(), CommandFactory::with_defaults(), config)
    }
}

impl<C: Canvas> HistoryWorker<C> {
    pub fn with_history(mut history: DrawHistory<C>, factory: CommandFactory, config: WorkerConfig) -> Self {
        let changes = history.subscribe();
        let hash = HistoryHash::of(&history);
        Self {
            history,
            changes,
            hash,
            peers: PeerSet::new(),
            factory,
            config,
        }
    }

    /// Start working on another history. The previous one is handed back and
    /// its changes are no longer observed.
    pub fn track(&mut self, mut history: DrawHistory<C>) -> DrawHistory<C> {
        self.changes = history.subscribe();
        self.hash.calculate(&history);
        log::debug!("Tracking history of {} commands", history.len());
        std::mem::replace(&mut self.history, history)
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn history(&self) -> &DrawHistory<C> {
        &self.history
    }

    /// Mutable access for local edits. Changes are picked up by
    /// [`drain_changes`](Self::drain_changes).
    pub fn history_mut(&mut self) -> &mut DrawHistory<C> {
        &mut self.history
    }

    pub fn hash(&self) -> &HistoryHash {
        &self.hash
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn factory(&self) -> &CommandFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut CommandFactory {
        &mut self.factory
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    // ───────────────────────────────────────────────────────────────
    // Peers
    // ───────────────────────────────────────────────────────────────

    pub fn add_peer(&mut self, channel: PeerChannel) {
        self.peers.add(channel);
    }

    pub fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// Send our total hash to a newly connected peer only.
    pub fn start_synchronization(&mut self, peer_id: &PeerId) -> Result<(), WorkerError> {
        log::debug!("Starting synchronization with {peer_id}");
        self.peers
            .send_to(peer_id, &Package::hash_update(self.hash.total_hash()))?;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Local changes
    // ───────────────────────────────────────────────────────────────

    /// Handle every pending history notification. Returns how many were
    /// seen; a burst of edits produces a single hash update.
    pub fn drain_changes(&mut self) -> Result<usize, WorkerError> {
        let mut last = None;
        let mut seen = 0;
        while let Ok(change) = self.changes.try_recv() {
            last = Some(change);
            seen += 1;
        }
        if let Some(change) = last {
            self.on_history_changed(change)?;
        }
        Ok(seen)
    }

    /// React to a local history mutation.
    pub fn on_history_changed(&mut self, change: HistoryChange) -> Result<(), WorkerError> {
        log::trace!("History changed: {change:?}");
        self.update()
    }

    /// Recompute hashes and broadcast the total.
    pub fn update(&mut self) -> Result<(), WorkerError> {
        self.hash.calculate(&self.history);
        let sent = self
            .peers
            .broadcast(&Package::hash_update(self.hash.total_hash()))?;
        log::debug!(
            "Broadcast hash {:016x} ({} commands) to {sent} peer(s)",
            self.hash.total_hash(),
            self.hash.len()
        );
        Ok(())
    }

    pub fn is_valid_hash(&self, total_hash: u64) -> bool {
        self.hash.is_valid(total_hash)
    }

    /// Where `remote` first disagrees with our hashes.
    pub fn diff_position(&self, remote: &[u64]) -> Option<usize> {
        diff_position(self.hash.command_hashes(), remote)
    }

    // ───────────────────────────────────────────────────────────────
    // Inbound packages
    // ───────────────────────────────────────────────────────────────

    /// Process one package from `from`. Returns a report when the package
    /// rewrote the history.
    pub fn handle_package(
        &mut self,
        from: &PeerId,
        package: &Package,
    ) -> Result<Option<ReconcileReport>, WorkerError> {
        match package.package_type {
            PackageType::HistoryHashUpdate => {
                self.handle_hash_update(from, package.total_hash()?)?;
            }
            PackageType::CommandHashesRequest => {
                self.handle_hashes_request(from)?;
            }
            PackageType::CommandHashesResponse => {
                self.handle_hashes_response(from, &package.command_hashes()?)?;
            }
            PackageType::CommandsRequest => {
                self.handle_commands_request(from, package.from_position()?)?;
            }
            PackageType::CommandsResponse => {
                return self.handle_commands_response(package.commands_range()?).map(Some);
            }
        }
        Ok(None)
    }

    fn handle_hash_update(&mut self, from: &PeerId, total_hash: u64) -> Result<(), WorkerError> {
        if self.is_valid_hash(total_hash) {
            log::trace!("Hash {total_hash:016x} matches, nothing to do");
            return Ok(());
        }
        log::debug!(
            "Hash mismatch: remote {total_hash:016x}, local {:016x}",
            self.hash.total_hash()
        );
        self.reply(from, &Package::hashes_request())
    }

    fn handle_hashes_request(&mut self, from: &PeerId) -> Result<(), WorkerError> {
        let response = Package::hashes_response(self.hash.command_hashes());
        self.reply(from, &response)
    }

    fn handle_hashes_response(&mut self, from: &PeerId, remote: &[u64]) -> Result<(), WorkerError> {
        match self.diff_position(remote) {
            Some(position) => {
                log::debug!("Histories diverge at {position}, requesting commands");
                self.reply(from, &Package::commands_request(position as u64))
            }
            None => {
                log::trace!("Hash lists agree, nothing to request");
                Ok(())
            }
        }
    }

    fn handle_commands_request(&mut self, from: &PeerId, position: u64) -> Result<(), WorkerError> {
        let cursor = self.history.cursor();
        let start = usize::try_from(position).map_or(cursor, |p| p.min(cursor));
        let commands = self.history.applied_mementos(start);
        log::debug!("Sending {} command(s) from position {start}", commands.len());
        self.reply(from, &Package::commands_response(commands, start as u64))
    }

    fn handle_commands_response(&mut self, range: CommandsRange) -> Result<ReconcileReport, WorkerError> {
        let applied_len = self.history.cursor();
        let from_position = match usize::try_from(range.from_position) {
            Ok(p) if p <= applied_len => p,
            _ => {
                log::warn!(
                    "Ignoring commands from position {} beyond applied length {applied_len}",
                    range.from_position
                );
                return Err(WorkerError::PositionOutOfRange {
                    position: range.from_position,
                    len: applied_len,
                });
            }
        };

        let previous_hash = self.hash.total_hash();
        let report = self.reconcile(from_position, &range);
        self.hash.calculate(&self.history);

        if report.is_complete() {
            log::info!(
                "Reconciled from {}: popped {}, applied {}",
                report.from_position,
                report.popped,
                report.applied
            );
        } else {
            log::warn!(
                "Partial reconcile from {}: applied {}, {} command(s) rejected (first: {})",
                report.from_position,
                report.applied,
                report.failed.len(),
                report.failed[0].error
            );
        }

        // Concurrent edits make two peers adopt each other's log. Only the
        // side that overwrote its own commands and landed on the lower hash
        // announces again, so both settle on that log. A partial log is
        // never announced.
        let overwrote = from_position < applied_len;
        if overwrote && report.is_complete() && self.hash.total_hash() < previous_hash {
            log::debug!("Overwrote local commands, announcing {:016x}", self.hash.total_hash());
            self.update()?;
        }
        Ok(report)
    }

    /// Truncate to `from_position` and append the remote commands, without
    /// notifying our own listeners.
    fn reconcile(&mut self, from_position: usize, range: &CommandsRange) -> ReconcileReport {
        let mut report = ReconcileReport {
            from_position,
            ..Default::default()
        };

        let mut rebuilt = Vec::with_capacity(range.commands.len());
        for (offset, memento) in range.commands.iter().enumerate() {
            match self.factory.from_memento(memento) {
                Ok(command) => rebuilt.push(command),
                Err(error) => report.failed.push(RejectedCommand {
                    position: from_position + offset,
                    error,
                }),
            }
        }
        // Only the prefix before the first failure keeps its positions
        let keep = report
            .failed
            .first()
            .map_or(rebuilt.len(), |first| first.position - from_position);
        rebuilt.truncate(keep);

        let mut history = self.history.silenced();
        while history.len() > from_position {
            history.pop();
            report.popped += 1;
        }
        for command in rebuilt {
            history.push(command);
            report.applied += 1;
        }
        report
    }

    fn reply(&mut self, to: &PeerId, package: &Package) -> Result<(), WorkerError> {
        match self.config.routing {
            ResponseRouting::Broadcast => {
                self.peers.broadcast(package)?;
            }
            ResponseRouting::Unicast => self.peers.send_to(to, package)?,
        }
        Ok(())
    }
}

impl<C: Canvas> std::fmt::Debug for HistoryWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryWorker")
            .field("history", &self.history)
            .field("total_hash", &format_args!("{:016x}", self.hash.total_hash()))
            .field("peers", &self.peers)
            .field("config", &self.config)
            .finish()
    }
}
