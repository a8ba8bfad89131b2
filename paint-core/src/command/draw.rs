use crate::canvas::{Canvas, Stroke};
use crate::{Pen, Point};

use super::{Command, CommandError, CommandKind, CommandMemento};

/// Draw command for every built-in shape. The kind picks how the canvas
/// interprets the control points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCommand {
    kind: CommandKind,
    pen: Pen,
    points: Vec<Point>,
}

impl DrawCommand {
    /// Empty command, to be filled with [`Command::retrieve_memento`].
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            pen: Pen::default(),
            points: Vec::new(),
        }
    }

    pub fn line(pen: Pen, start: Point, end: Point) -> Self {
        Self { kind: CommandKind::Line, pen, points: vec![start, end] }
    }

    pub fn rectangle(pen: Pen, start: Point, end: Point) -> Self {
        Self { kind: CommandKind::Rectangle, pen, points: vec![start, end] }
    }

    pub fn ellipse(pen: Pen, start: Point, end: Point) -> Self {
        Self { kind: CommandKind::Ellipse, pen, points: vec![start, end] }
    }

    pub fn freehand(pen: Pen, points: Vec<Point>) -> Self {
        Self { kind: CommandKind::Freehand, pen, points }
    }

    pub fn pen(&self) -> Pen {
        self.pen
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn stroke(&self) -> Stroke {
        Stroke {
            kind: self.kind,
            pen: self.pen,
            points: self.points.clone(),
        }
    }
}

impl Command for DrawCommand {
    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn execute(&self, canvas: &mut dyn Canvas) {
        canvas.draw(&self.stroke());
    }

    fn undo(&self, canvas: &mut dyn Canvas) {
        canvas.erase(&self.stroke());
    }

    fn memento(&self) -> CommandMemento {
        CommandMemento::new(self.kind, self.pen, self.points.clone())
    }

    fn retrieve_memento(&mut self, memento: &CommandMemento) -> Result<(), CommandError> {
        if memento.kind != self.kind.tag() {
            return Err(CommandError::KindMismatch {
                expected: self.kind.tag(),
                got: memento.kind,
            });
        }
        if !self.kind.accepts_points(memento.points.len()) {
            return Err(CommandError::InvalidMemento(format!(
                "{:?} cannot be built from {} points",
                self.kind,
                memento.points.len()
            )));
        }
        self.pen = memento.pen;
        self.points = memento.points.clone();
        Ok(())
    }
}
