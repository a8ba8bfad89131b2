//! # paint-core: Command history for the collaborative canvas
//!
//! The canvas state is an ordered log of drawing commands with an undo/redo
//! cursor. Everything the sync layer needs to compare and rebuild that log
//! lives here.
//!
//! ## Architecture
//!
//! ```text
//!  CommandMemento ──► CommandFactory ──► Box<dyn Command>
//!   (wire value)       (tag → ctor)            │
//!                                              ▼ add / push
//!                                       ┌─────────────┐   HistoryChange
//!                                       │ DrawHistory │ ─────────────────► subscribers
//!                                       │  [..cursor) │
//!                                       └──────┬──────┘
//!                                              │ execute / undo
//!                                              ▼
//!                                          dyn Canvas
//!
//!  DrawHistory ──► HistoryHash::calculate ──► (command_hashes, total_hash)
//! ```
//!
//! ## Modules
//!
//! - [`canvas`] - drawing surface commands execute against
//! - [`command`] - `Command` trait, mementos, built-in draw commands, factory
//! - [`history`] - ordered log with undo/redo cursor and change notifications
//! - [`hash`] - per-command and total hashes of the applied region

use serde::{Deserialize, Serialize};

pub mod canvas;
pub mod command;
pub mod hash;
pub mod history;

pub use canvas::{Canvas, SceneCanvas, Stroke};
pub use command::factory::{CommandConstructor, CommandFactory};
pub use command::{Command, CommandError, CommandKind, CommandMemento, DrawCommand};
pub use hash::HistoryHash;
pub use history::{DrawHistory, HistoryChange, Silenced};

/// Integer pixel position on the canvas.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, always normalized (non-negative size).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Build the rectangle spanned by two opposite corners.
    pub fn from_diagonal(start: Point, end: Point) -> Self {
        let x = start.x.min(end.x);
        let y = start.y.min(end.y);
        Self {
            x,
            y,
            width: start.x.max(end.x) - x,
            height: start.y.max(end.y) - y,
        }
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Rect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    /// Grow every edge by `amount`.
    pub fn inflate(&self, amount: i32) -> Rect {
        Rect {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + 2 * amount,
            height: self.height + 2 * amount,
        }
    }
}

/// Pen used to stroke a shape.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub struct Pen {
    /// RGBA color
    pub color: [u8; 4],
    /// Stroke width in pixels
    pub width: u16,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            color: [0, 0, 0, 255],
            width: 1,
        }
    }
}

impl Pen {
    pub fn new(color: [u8; 4], width: u16) -> Self {
        Self { color, width }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_from_diagonal_normalizes() {
        let rect = Rect::from_diagonal(Point::new(30, 40), Point::new(10, 5));
        assert_eq!(rect, Rect { x: 10, y: 5, width: 20, height: 35 });
    }

    #[test]
    fn test_rect_union() {
        let a = Rect { x: 0, y: 0, width: 10, height: 10 };
        let b = Rect { x: 5, y: -5, width: 20, height: 5 };
        assert_eq!(a.union(&b), Rect { x: 0, y: -5, width: 25, height: 15 });
    }

    #[test]
    fn test_pen_default() {
        let pen = Pen::default();
        assert_eq!(pen.color, [0, 0, 0, 255]);
        assert_eq!(pen.width, 1);
    }
}
