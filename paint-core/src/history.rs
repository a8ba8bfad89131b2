//! Ordered command log with an undo/redo cursor.
//!
//! ```text
//!   commands: [ A | B | C | D | E ]
//!                           ▲
//!                         cursor = 3
//!   applied ──────────────┘ └───── redo tail
//! ```
//!
//! Invariant: `0 <= cursor <= len`. Commands below the cursor are on the
//! canvas; commands at or above it are only reachable through `redo`.
//!
//! Every mutation is announced to subscribers as a [`HistoryChange`], except
//! while a [`Silenced`] guard is alive. The sync layer takes that guard while
//! it rewrites the log to match a peer, so its own rewrite never comes back
//! to it as a local edit.

use std::ops::{Deref, DerefMut};
use tokio::sync::mpsc;

use crate::canvas::{Canvas, SceneCanvas};
use crate::command::{Command, CommandMemento};

/// Mutation announced to history subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryChange {
    /// A user edit appended a command (redo tail dropped)
    Added { len: usize },
    /// The cursor moved one step back
    Undone { cursor: usize },
    /// The cursor moved one step forward
    Redone { cursor: usize },
    /// The log was emptied
    Cleared,
    /// The last command was removed directly
    Popped { len: usize },
    /// A command was appended directly
    Pushed { len: usize },
}

/// The command log of one drawing session.
pub struct DrawHistory<C: Canvas = SceneCanvas> {
    commands: Vec<Box<dyn Command>>,
    cursor: usize,
    canvas: C,
    listeners: Vec<mpsc::UnboundedSender<HistoryChange>>,
    silenced: bool,
}

impl DrawHistory<SceneCanvas> {
    /// Empty history drawing onto a fresh in-memory canvas.
    pub fn new() -> Self {
        Self::with_canvas(SceneCanvas::new())
    }
}

impl Default for DrawHistory<SceneCanvas> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Canvas> DrawHistory<C> {
    pub fn with_canvas(canvas: C) -> Self {
        Self {
            commands: Vec::new(),
            cursor: 0,
            canvas,
            listeners: Vec::new(),
            silenced: false,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // User edits
    // ───────────────────────────────────────────────────────────────

    /// Apply a new command. Anything that could have been redone is gone.
    pub fn add(&mut self, command: Box<dyn Command>) {
        self.append(command);
        self.notify(HistoryChange::Added { len: self.commands.len() });
    }

    /// Step back one command. Returns `false` at the start of the log.
    pub fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.commands[self.cursor].undo(&mut self.canvas);
        self.notify(HistoryChange::Undone { cursor: self.cursor });
        true
    }

    /// Step forward one command. Returns `false` at the top of the log.
    pub fn redo(&mut self) -> bool {
        if self.cursor == self.commands.len() {
            return false;
        }
        self.commands[self.cursor].execute(&mut self.canvas);
        self.cursor += 1;
        self.notify(HistoryChange::Redone { cursor: self.cursor });
        true
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.cursor = 0;
        self.canvas.clear();
        self.notify(HistoryChange::Cleared);
    }

    // ───────────────────────────────────────────────────────────────
    // Direct log rewrites (no undo/redo semantics)
    // ───────────────────────────────────────────────────────────────

    /// Remove the last command of the log, applied or not. If it was on the
    /// canvas its stroke is taken back and the cursor follows the new end.
    pub fn pop(&mut self) -> Option<Box<dyn Command>> {
        let command = self.commands.pop()?;
        if self.cursor > self.commands.len() {
            command.undo(&mut self.canvas);
            self.cursor = self.commands.len();
        }
        self.notify(HistoryChange::Popped { len: self.commands.len() });
        Some(command)
    }

    /// Append and apply a command at the end of the applied region.
    pub fn push(&mut self, command: Box<dyn Command>) {
        self.append(command);
        self.notify(HistoryChange::Pushed { len: self.commands.len() });
    }

    fn append(&mut self, command: Box<dyn Command>) {
        // Redo tail was never on the canvas, nothing to take back
        self.commands.truncate(self.cursor);
        command.execute(&mut self.canvas);
        self.commands.push(command);
        self.cursor = self.commands.len();
    }

    // ───────────────────────────────────────────────────────────────
    // Notifications
    // ───────────────────────────────────────────────────────────────

    /// Register a listener for history changes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<HistoryChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    /// Suspend notifications until the returned guard is dropped.
    pub fn silenced(&mut self) -> Silenced<'_, C> {
        let was_silenced = std::mem::replace(&mut self.silenced, true);
        Silenced {
            history: self,
            was_silenced,
        }
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced
    }

    fn notify(&mut self, change: HistoryChange) {
        if self.silenced {
            log::trace!("History change {change:?} suppressed");
            return;
        }
        self.listeners.retain(|tx| tx.send(change).is_ok());
    }

    // ───────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn get(&self, index: usize) -> Option<&dyn Command> {
        self.commands.get(index).map(|c| &**c)
    }

    /// Every command in the log, redo tail included.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> + '_ {
        self.commands.iter().map(|c| &**c)
    }

    /// Commands currently on the canvas, oldest first.
    pub fn applied(&self) -> impl Iterator<Item = &dyn Command> + '_ {
        self.commands[..self.cursor].iter().map(|c| &**c)
    }

    /// Mementos of the applied commands starting at `from`.
    pub fn applied_mementos(&self, from: usize) -> Vec<CommandMemento> {
        self.applied().skip(from).map(|c| c.memento()).collect()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.commands.len()
    }

    /// Cursor sits after the last command.
    pub fn is_on_top(&self) -> bool {
        self.cursor == self.commands.len()
    }

    /// Cursor sits before the first command.
    pub fn is_on_start(&self) -> bool {
        self.cursor == 0
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }
}

impl<C: Canvas> std::fmt::Debug for DrawHistory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawHistory")
            .field("len", &self.commands.len())
            .field("cursor", &self.cursor)
            .field("listeners", &self.listeners.len())
            .field("silenced", &self.silenced)
            .finish()
    }
}

/// Scoped suspension of history notifications.
///
/// Dereferences to the history. Dropping it restores whatever state was in
/// place when it was taken, so guards nest and unwinding releases them.
pub struct Silenced<'a, C: Canvas = SceneCanvas> {
    history: &'a mut DrawHistory<C>,
    was_silenced: bool,
}

impl<C: Canvas> Deref for Silenced<'_, C> {
    type Target = DrawHistory<C>;

    fn deref(&self) -> &Self::Target {
        self.history
    }
}

impl<C: Canvas> DerefMut for Silenced<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.history
    }
}

impl<C: Canvas> Drop for Silenced<'_, C> {
    fn drop(&mut self) {
        self.history.silenced = self.was_silenced;
    }
}
