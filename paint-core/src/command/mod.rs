//! Undoable drawing commands and their serializable mementos.
//!
//! A live [`Command`] never leaves the process. What crosses the wire is its
//! [`CommandMemento`]: the kind tag plus enough state for
//! [`CommandFactory`](factory::CommandFactory) to rebuild it on the other side.

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::{Pen, Point};

mod draw;
pub mod factory;

pub use draw::DrawCommand;

/// Built-in command kinds. The discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    /// Straight segment between two points
    Line = 1,
    /// Axis-aligned rectangle spanned by two corners
    Rectangle = 2,
    /// Ellipse inscribed in the rectangle spanned by two corners
    Ellipse = 3,
    /// Polyline through every recorded point
    Freehand = 4,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Line,
        CommandKind::Rectangle,
        CommandKind::Ellipse,
        CommandKind::Freehand,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Whether `count` control points make a valid shape of this kind.
    pub fn accepts_points(self, count: usize) -> bool {
        match self {
            CommandKind::Line | CommandKind::Rectangle | CommandKind::Ellipse => count == 2,
            CommandKind::Freehand => count >= 1,
        }
    }
}

/// Serializable snapshot of a command.
///
/// `kind` is kept as the raw tag so that a memento of a kind this build does
/// not know still decodes; the factory rejects it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMemento {
    pub kind: u8,
    pub pen: Pen,
    pub points: Vec<Point>,
}

impl CommandMemento {
    pub fn new(kind: CommandKind, pen: Pen, points: Vec<Point>) -> Self {
        Self {
            kind: kind.tag(),
            pen,
            points,
        }
    }

    /// Two-point shape (line, rectangle, ellipse).
    pub fn shape(kind: CommandKind, pen: Pen, start: Point, end: Point) -> Self {
        Self::new(kind, pen, vec![start, end])
    }
}

/// Command errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No constructor registered for this tag
    UnknownKind(u8),
    /// Memento of one kind restored into a command of another
    KindMismatch { expected: u8, got: u8 },
    /// Memento state is not a valid shape
    InvalidMemento(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind(tag) => write!(f, "Unknown command kind: {tag}"),
            Self::KindMismatch { expected, got } => {
                write!(f, "Memento kind mismatch: expected {expected}, got {got}")
            }
            Self::InvalidMemento(e) => write!(f, "Invalid memento: {e}"),
        }
    }
}

impl std::error::Error for CommandError {}

/// One undoable unit of drawing work.
///
/// `execute` and `undo` change the canvas, never the command. Mementos are the
/// only way state gets in or out, so the history and the sync layer never
/// need to know the concrete type.
pub trait Command: Send + std::fmt::Debug {
    fn kind(&self) -> CommandKind;

    fn execute(&self, canvas: &mut dyn Canvas);

    fn undo(&self, canvas: &mut dyn Canvas);

    fn memento(&self) -> CommandMemento;

    /// Replace this command's state with the memento's.
    fn retrieve_memento(&mut self, memento: &CommandMemento) -> Result<(), CommandError>;
}
