//! Stop events and time-keyed markers.
//!
//! A [`StopEvent`] runs while the robot is stationary between two mission
//! segments. [`Marker`]s fire at trajectory times while the robot is moving;
//! a [`MarkerDispatcher`] drains them from a queue on its own task so that
//! command execution never delays the tracking loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandTable};
use crate::error::CommandError;
use crate::run::RunToken;

/// How the commands of a stop event are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One after another; the robot waits for each.
    #[default]
    Sequential,
    /// All launched at once; the robot moves on without waiting for them.
    Parallel,
}

/// Waiting around the commands of a stop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitPolicy {
    /// Pause before the commands start.
    pub before: Duration,
    /// Pause after the commands finish (or are launched, when parallel).
    pub after: Duration,
    /// Shortest total time spent stopped.
    pub min_duration: Duration,
}

/// A command that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailure {
    pub command: Command,
    pub error: String,
}

impl CommandFailure {
    fn new(command: Command, error: CommandError) -> Self {
        Self {
            command,
            error: error.to_string(),
        }
    }

    /// The failure to report for `command`'s `result`. A command stopped by
    /// its run being cancelled has not failed.
    fn from_result(command: Command, result: Result<(), CommandError>, source: &'static str) -> Option<Self> {
        match result {
            Ok(()) => None,
            Err(CommandError::Cancelled) => {
                debug!(?command, source, "Command cancelled with its run");
                None
            }
            Err(error) => {
                warn!(?command, %error, source, "Command failed");
                Some(Self::new(command, error))
            }
        }
    }
}

/// Background work that outlives the call that started it. Joined by the
/// executor at the end of the mission.
pub type Detached = JoinHandle<Vec<CommandFailure>>;

/// Result of running a stop event.
#[derive(Debug, Default)]
pub struct StopOutcome {
    /// Failures of commands that ran to completion in the foreground.
    pub failures: Vec<CommandFailure>,
    /// Parallel commands still in flight.
    pub detached: Vec<Detached>,
    /// The run went stale before the stop event finished.
    pub cancelled: bool,
}

/// Commands run while the robot is stopped at a segment boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StopEvent {
    pub commands: Vec<Command>,
    pub mode: ExecutionMode,
    pub wait: WaitPolicy,
}

impl StopEvent {
    /// Run the stop event for `token`'s run.
    ///
    /// A failing command does not stop the remaining ones. Every wait
    /// checks the token, and nothing further is started once it is stale.
    pub async fn run(&self, table: &Arc<CommandTable>, token: &RunToken) -> StopOutcome {
        let started = Instant::now();
        let mut outcome = StopOutcome::default();
        info!(commands = self.commands.len(), mode = ?self.mode, "Stop event started");

        if !token.sleep(self.wait.before).await {
            outcome.cancelled = true;
            return outcome;
        }

        match self.mode {
            ExecutionMode::Sequential => {
                for command in &self.commands {
                    if !token.is_active() {
                        outcome.cancelled = true;
                        return outcome;
                    }
                    let result = table.execute(command.clone(), token.clone()).await;
                    outcome
                        .failures
                        .extend(CommandFailure::from_result(command.clone(), result, "stop event"));
                }
            }
            ExecutionMode::Parallel => {
                for command in &self.commands {
                    let table = Arc::clone(table);
                    let token = token.clone();
                    let command = command.clone();
                    outcome.detached.push(tokio::spawn(async move {
                        let result = table.execute(command.clone(), token).await;
                        CommandFailure::from_result(command, result, "parallel stop event")
                            .into_iter()
                            .collect()
                    }));
                }
            }
        }

        if !token.sleep(self.wait.after).await {
            outcome.cancelled = true;
            return outcome;
        }
        if !token.sleep_until(started + self.wait.min_duration).await {
            outcome.cancelled = true;
            return outcome;
        }
        debug!(elapsed = ?started.elapsed(), "Stop event finished");
        outcome
    }
}

/// Commands fired at an absolute trajectory time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Trajectory time (s).
    pub time: f64,
    pub commands: Vec<Command>,
}

/// Fires the markers of one mission segment against that segment's clock.
pub struct MarkerDispatcher {
    queue: VecDeque<Marker>,
    table: Arc<CommandTable>,
    token: RunToken,
    /// Wall-clock instant at which the segment's trajectory time was `start_time`.
    origin: Instant,
    start_time: f64,
}

impl MarkerDispatcher {
    /// Markers are fired in time order regardless of the order given.
    pub fn new(
        mut markers: Vec<Marker>,
        table: Arc<CommandTable>,
        token: RunToken,
        origin: Instant,
        start_time: f64,
    ) -> Self {
        markers.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            queue: markers.into(),
            table,
            token,
            origin,
            start_time,
        }
    }

    /// Spawn the dispatcher on the runtime.
    pub fn spawn(self) -> Detached {
        tokio::spawn(self.run())
    }

    /// Wait for each marker's time and run its commands in order, until the
    /// queue is empty or the run goes stale. Markers already due fire at once.
    pub async fn run(mut self) -> Vec<CommandFailure> {
        let mut failures = Vec::new();
        while let Some(marker) = self.queue.pop_front() {
            let offset = Duration::from_secs_f64((marker.time - self.start_time).max(0.0));
            if !self.token.sleep_until(self.origin + offset).await {
                debug!(remaining = self.queue.len() + 1, "Marker queue dropped on cancel");
                break;
            }
            info!(time = marker.time, commands = marker.commands.len(), "Marker reached");
            for command in marker.commands {
                let result = self.table.execute(command.clone(), self.token.clone()).await;
                failures.extend(CommandFailure::from_result(command, result, "marker"));
            }
        }
        failures
    }
}
