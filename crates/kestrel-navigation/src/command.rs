//! Commands attached to stop events and markers.
//!
//! Commands are a closed set of tagged variants. Each kind is executed by the
//! [`CommandHandler`] registered for it in a [`CommandTable`]; a command with
//! no registered handler fails without side effects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CommandError;
use crate::run::RunToken;

/// A single action triggered by a stop event or marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Hold for a number of seconds. Cancelled with the run.
    Wait { seconds: f64 },
    /// Emit a log line.
    Log { message: String },
    /// Turn a named attachment motor by a number of revolutions.
    Attachment { name: String, rotations: f64 },
}

/// Discriminant of [`Command`], used as the lookup key for handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Wait,
    Log,
    Attachment,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Wait { .. } => CommandKind::Wait,
            Command::Log { .. } => CommandKind::Log,
            Command::Attachment { .. } => CommandKind::Attachment,
        }
    }

    /// Check the arguments of the command.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Wait { seconds } if !(seconds.is_finite() && *seconds >= 0.0) => {
                Err(format!("wait of {seconds} s is not a finite non-negative duration"))
            }
            Command::Attachment { rotations, .. } if !rotations.is_finite() => {
                Err(format!("attachment rotation {rotations} is not finite"))
            }
            _ => Ok(()),
        }
    }
}

/// Executes commands of one kind.
///
/// Handlers run on the blocking thread pool, so they may block, but long
/// actions should poll `token` and return [`CommandError::Cancelled`] once
/// the run goes stale.
pub trait CommandHandler: Send + Sync {
    fn execute(&self, command: &Command, token: &RunToken) -> Result<(), CommandError>;
}

/// Built-in handler for [`Command::Wait`].
#[derive(Debug, Default)]
pub struct WaitHandler;

impl CommandHandler for WaitHandler {
    fn execute(&self, command: &Command, token: &RunToken) -> Result<(), CommandError> {
        let Command::Wait { seconds } = command else {
            return Err(CommandError::Failed(format!("wait handler got {:?}", command.kind())));
        };
        if token.sleep_blocking(Duration::from_secs_f64(seconds.max(0.0))) {
            Ok(())
        } else {
            Err(CommandError::Cancelled)
        }
    }
}

/// Built-in handler for [`Command::Log`].
#[derive(Debug, Default)]
pub struct LogHandler;

impl CommandHandler for LogHandler {
    fn execute(&self, command: &Command, token: &RunToken) -> Result<(), CommandError> {
        match command {
            Command::Log { message } => {
                info!(run = %token.id(), "{message}");
                Ok(())
            }
            other => Err(CommandError::Failed(format!("log handler got {:?}", other.kind()))),
        }
    }
}

/// Lookup table from command kind to handler.
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl CommandTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with the built-in `Wait` and `Log` handlers.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register(CommandKind::Wait, Arc::new(WaitHandler));
        table.register(CommandKind::Log, Arc::new(LogHandler));
        table
    }

    /// Register `handler` for `kind`, replacing any previous handler.
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Run `command` on the calling thread.
    pub fn dispatch(&self, command: &Command, token: &RunToken) -> Result<(), CommandError> {
        if !token.is_active() {
            return Err(CommandError::Cancelled);
        }
        let handler = self
            .handlers
            .get(&command.kind())
            .ok_or(CommandError::Unregistered(command.kind()))?;
        debug!(?command, run = %token.id(), "Dispatching command");
        handler.execute(command, token)
    }

    /// Run `command` on the blocking pool and wait for it.
    pub async fn execute(self: &Arc<Self>, command: Command, token: RunToken) -> Result<(), CommandError> {
        let table = Arc::clone(self);
        tokio::task::spawn_blocking(move || table.dispatch(&command, &token))
            .await
            .map_err(|e| CommandError::Join(e.to_string()))?
    }
}
