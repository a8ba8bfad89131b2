//! Maps a kind tag back to a command constructor.
//!
//! This is the only place that knows concrete command types; the history and
//! the sync layer go through tags and mementos.

use std::collections::HashMap;

use super::{Command, CommandError, CommandKind, CommandMemento, DrawCommand};

/// Builds an empty command of one kind.
pub type CommandConstructor = fn() -> Box<dyn Command>;

/// Registry of command constructors keyed by wire tag.
#[derive(Clone)]
pub struct CommandFactory {
    constructors: HashMap<u8, CommandConstructor>,
}

impl CommandFactory {
    /// Factory that knows no kinds.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory with every built-in draw command registered.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register(CommandKind::Line.tag(), || Box::new(DrawCommand::new(CommandKind::Line)));
        factory.register(CommandKind::Rectangle.tag(), || {
            Box::new(DrawCommand::new(CommandKind::Rectangle))
        });
        factory.register(CommandKind::Ellipse.tag(), || Box::new(DrawCommand::new(CommandKind::Ellipse)));
        factory.register(CommandKind::Freehand.tag(), || {
            Box::new(DrawCommand::new(CommandKind::Freehand))
        });
        factory
    }

    /// Register a constructor. A tag maps to exactly one constructor; the
    /// previous one, if any, is returned.
    pub fn register(&mut self, tag: u8, constructor: CommandConstructor) -> Option<CommandConstructor> {
        self.constructors.insert(tag, constructor)
    }

    /// New empty command of the requested kind.
    pub fn create_by_type(&self, tag: u8) -> Result<Box<dyn Command>, CommandError> {
        self.constructors
            .get(&tag)
            .map(|constructor| constructor())
            .ok_or(CommandError::UnknownKind(tag))
    }

    /// Create and restore in one step.
    pub fn from_memento(&self, memento: &CommandMemento) -> Result<Box<dyn Command>, CommandError> {
        let mut command = self.create_by_type(memento.kind)?;
        command.retrieve_memento(memento)?;
        Ok(command)
    }

    pub fn knows(&self, tag: u8) -> bool {
        self.constructors.contains_key(&tag)
    }

    /// Registered tags, ascending.
    pub fn tags(&self) -> Vec<u8> {
        let mut tags: Vec<u8> = self.constructors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for CommandFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFactory").field("tags", &self.tags()).finish()
    }
}
