//! Drawing surface that commands execute against.
//!
//! Painting itself happens outside this crate. A [`Canvas`] only has to
//! accept strokes, take them back on undo, and wipe itself on clear.
//! [`SceneCanvas`] is the headless implementation: it keeps the visible
//! strokes in paint order plus the damaged region a renderer would repaint.

use crate::command::CommandKind;
use crate::{Pen, Point, Rect};

/// One shape as handed to the drawing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stroke {
    pub kind: CommandKind,
    pub pen: Pen,
    pub points: Vec<Point>,
}

impl Stroke {
    /// Bounding box of the control points, grown by the pen width.
    pub fn bounds(&self) -> Option<Rect> {
        let first = *self.points.first()?;
        let rect = self
            .points
            .iter()
            .skip(1)
            .fold(Rect::from_diagonal(first, first), |acc, p| {
                acc.union(&Rect::from_diagonal(*p, *p))
            });
        Some(rect.inflate((i32::from(self.pen.width) + 1) / 2))
    }
}

/// Drawing surface used by commands.
pub trait Canvas: Send {
    /// Paint a stroke on top of everything drawn so far.
    fn draw(&mut self, stroke: &Stroke);

    /// Remove the most recent occurrence of `stroke`.
    fn erase(&mut self, stroke: &Stroke);

    /// Wipe the surface.
    fn clear(&mut self);
}

/// In-memory canvas recording visible strokes in paint order.
#[derive(Debug, Default, Clone)]
pub struct SceneCanvas {
    strokes: Vec<Stroke>,
    damage: Option<Rect>,
}

impl SceneCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible strokes, bottom to top.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// Region changed since the last call, for repaint requests.
    pub fn take_damage(&mut self) -> Option<Rect> {
        self.damage.take()
    }

    fn damage(&mut self, stroke: &Stroke) {
        if let Some(bounds) = stroke.bounds() {
            self.damage = Some(match self.damage {
                Some(current) => current.union(&bounds),
                None => bounds,
            });
        }
    }
}

impl Canvas for SceneCanvas {
    fn draw(&mut self, stroke: &Stroke) {
        self.damage(stroke);
        self.strokes.push(stroke.clone());
    }

    fn erase(&mut self, stroke: &Stroke) {
        match self.strokes.iter().rposition(|s| s == stroke) {
            Some(index) => {
                self.strokes.remove(index);
                self.damage(stroke);
            }
            None => log::warn!("Erase requested for a {:?} stroke that is not on the canvas", stroke.kind),
        }
    }

    fn clear(&mut self) {
        for stroke in std::mem::take(&mut self.strokes) {
            self.damage(&stroke);
        }
    }
}
