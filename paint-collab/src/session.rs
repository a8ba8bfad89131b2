//! The session task: single owner of the history and the worker.
//!
//! ```text
//!  SessionHandle ──SessionCommand──┐
//!                                  ▼
//!  transport tasks ──PeerEvent──► session loop ──► HistoryWorker
//!                                  │  (select!)         │
//!  resync interval ────────────────┘                    ▼
//!                                                   PeerSet ──► writer tasks
//!                                  │
//!                                  └──SessionEvent──► application
//! ```
//!
//! Local edits, history notifications and inbound packages are handled one
//! at a time, so the history is never touched from two places at once.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use paint_core::{Canvas, CommandError, CommandMemento};

use crate::peer::{PeerChannel, PeerId};
use crate::protocol::Package;
use crate::worker::{HistoryWorker, ReconcileReport, WorkerConfig};

/// Input from the transport layer.
#[derive(Debug)]
pub enum PeerEvent {
    /// A connection is up. `initiate` makes the session send our hash first.
    Connected { channel: PeerChannel, initiate: bool },
    /// A decoded package arrived
    Package { from: PeerId, package: Package },
    /// The connection is gone
    Disconnected { peer_id: PeerId },
}

/// Requests from the application.
#[derive(Debug)]
enum SessionCommand {
    Add(CommandMemento, oneshot::Sender<Result<(), CommandError>>),
    Undo(oneshot::Sender<bool>),
    Redo(oneshot::Sender<bool>),
    Clear(oneshot::Sender<()>),
    Resync(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<HistorySnapshot>),
    Shutdown,
}

/// Notifications for the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The applied history changed; repaint
    HistoryChanged { len: usize, cursor: usize },
    /// A peer's commands were merged into our log
    Reconciled(ReconcileReport),
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    /// A package could not be processed
    Error(String),
}

/// Copy of the applied history at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    /// Applied commands, oldest first
    pub commands: Vec<CommandMemento>,
    pub total_hash: u64,
    pub len: usize,
    pub cursor: usize,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub worker: WorkerConfig,
    /// Rebroadcast the total hash this often (None = only on changes)
    pub resync_interval: Option<Duration>,
    /// Buffered events before new ones are dropped
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            resync_interval: None,
            event_capacity: 256,
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session task has stopped
    Closed,
    Command(CommandError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Session closed"),
            Self::Command(e) => write!(f, "Command error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CommandError> for SessionError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
}

impl SessionHandle {
    /// Draw a new command built from `memento`.
    pub async fn add(&self, memento: CommandMemento) -> Result<(), SessionError> {
        self.request(|tx| SessionCommand::Add(memento, tx)).await??;
        Ok(())
    }

    /// Returns `false` when there was nothing to undo.
    pub async fn undo(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::Undo).await
    }

    /// Returns `false` when there was nothing to redo.
    pub async fn redo(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::Redo).await
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Clear).await
    }

    /// Broadcast our total hash now.
    pub async fn resync(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Resync).await
    }

    pub async fn snapshot(&self) -> Result<HistorySnapshot, SessionError> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Stop the session loop. Peers are dropped, which closes their
    /// connections.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    /// Sender the transport uses to report connections and packages.
    pub fn peer_events(&self) -> mpsc::UnboundedSender<PeerEvent> {
        self.peer_events.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// A spawned session.
pub struct Session {
    handle: SessionHandle,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl Session {
    /// Spawn a session over an empty in-memory history.
    pub fn spawn(config: SessionConfig) -> Self {
        let worker = HistoryWorker::new(config.worker.clone());
        Self::spawn_with(worker, config)
    }

    /// Spawn a session around an existing worker. Must be called from
    /// within a tokio runtime.
    pub fn spawn_with<C: Canvas + 'static>(worker: HistoryWorker<C>, config: SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);

        let task = SessionTask {
            worker,
            commands: command_rx,
            peer_events: peer_rx,
            events: event_tx,
            resync: config.resync_interval.map(resync_timer),
        };
        tokio::spawn(task.run(peer_tx.clone()));

        Self {
            handle: SessionHandle {
                commands: command_tx,
                peer_events: peer_tx,
            },
            event_rx: Some(event_rx),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }
}

fn resync_timer(period: Duration) -> Interval {
    // First tick one period from now, not immediately
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

struct SessionTask<C: Canvas> {
    worker: HistoryWorker<C>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    events: mpsc::Sender<SessionEvent>,
    resync: Option<Interval>,
}

impl<C: Canvas> SessionTask<C> {
    /// `_keepalive` holds one peer event sender so the channel never closes
    /// while the session runs.
    async fn run(mut self, _keepalive: mpsc::UnboundedSender<PeerEvent>) {
        log::info!("Session started");
        let mut resync = self.resync.take();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = self.peer_events.recv() => {
                    self.handle_peer_event(event);
                }
                _ = async {
                    match resync.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    log::trace!("Periodic resync");
                    if let Err(e) = self.worker.update() {
                        log::warn!("Resync failed: {e}");
                    }
                }
            }

            self.forward_changes();
        }

        log::info!("Session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Add(memento, reply) => {
                let result = self
                    .worker
                    .factory()
                    .from_memento(&memento)
                    .map(|command| self.worker.history_mut().add(command));
                if let Err(e) = &result {
                    log::warn!("Rejected local command: {e}");
                }
                let _ = reply.send(result);
            }
            SessionCommand::Undo(reply) => {
                let _ = reply.send(self.worker.history_mut().undo());
            }
            SessionCommand::Redo(reply) => {
                let _ = reply.send(self.worker.history_mut().redo());
            }
            SessionCommand::Clear(reply) => {
                self.worker.history_mut().clear();
                let _ = reply.send(());
            }
            SessionCommand::Resync(reply) => {
                if let Err(e) = self.worker.update() {
                    log::warn!("Resync failed: {e}");
                }
                let _ = reply.send(());
            }
            SessionCommand::Snapshot(reply) => {
                let history = self.worker.history();
                let _ = reply.send(HistorySnapshot {
                    commands: history.applied_mementos(0),
                    total_hash: self.worker.hash().total_hash(),
                    len: history.len(),
                    cursor: history.cursor(),
                });
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { channel, initiate } => {
                let peer_id = channel.id;
                log::info!("Peer {peer_id} connected ({})", channel.label);
                self.worker.add_peer(channel);
                if initiate {
                    if let Err(e) = self.worker.start_synchronization(&peer_id) {
                        log::warn!("Could not start synchronization with {peer_id}: {e}");
                    }
                }
                self.emit(SessionEvent::PeerConnected(peer_id));
            }
            PeerEvent::Package { from, package } => {
                match self.worker.handle_package(&from, &package) {
                    Ok(Some(report)) => {
                        self.emit_history_changed();
                        self.emit(SessionEvent::Reconciled(report));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Dropped {:?} from {from}: {e}", package.package_type);
                        self.emit(SessionEvent::Error(e.to_string()));
                    }
                }
            }
            PeerEvent::Disconnected { peer_id } => {
                if self.worker.remove_peer(&peer_id) {
                    log::info!("Peer {peer_id} disconnected");
                }
                self.emit(SessionEvent::PeerDisconnected(peer_id));
            }
        }
    }

    /// Broadcast pending local changes and tell the application.
    fn forward_changes(&mut self) {
        match self.worker.drain_changes() {
            Ok(0) => {}
            Ok(_) => self.emit_history_changed(),
            Err(e) => log::warn!("Failed to announce history change: {e}"),
        }
    }

    fn emit_history_changed(&self) {
        let history = self.worker.history();
        self.emit(SessionEvent::HistoryChanged {
            len: history.len(),
            cursor: history.cursor(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event queue full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
