//! This module defines the error types used by the `kestrel-navigation` crate.

use kestrel_kinematics::KinematicsError;
use kestrel_motor::{MotorError, SensorError};
use thiserror::Error;

use crate::command::CommandKind;

/// Error type for path loading, profiling and mission execution.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// The authored path is unusable: degenerate geometry, malformed motion
    /// events or markers out of range. Raised before any motion starts.
    #[error("invalid path: {0}")]
    Configuration(String),
    /// The path file could not be read.
    #[error("failed to read path file: {0}")]
    Io(#[from] std::io::Error),
    /// The path file is not valid JSON or does not match the path schema.
    #[error("malformed path file: {0}")]
    Json(#[from] serde_json::Error),
    /// The velocity profiler could not produce a trajectory.
    #[error("profiling failed: {0}")]
    Profile(String),
    /// A robot description or controller gain was rejected.
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),
    /// Odometry lost its encoders or heading sensor.
    #[error("sensor fault: {0}")]
    Sensor(#[from] SensorError),
    /// The actuator refused a wheel command.
    #[error(transparent)]
    Motor(#[from] MotorError),
    /// `start` was called on odometry that is already running.
    #[error("odometry is already running")]
    AlreadyRunning,
    /// A background thread panicked.
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Failure of a single stop-event or marker command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// No handler is registered for this kind of command.
    #[error("no handler registered for {0:?} commands")]
    Unregistered(CommandKind),
    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The run was cancelled while the command was executing.
    #[error("cancelled")]
    Cancelled,
    /// The handler panicked or its task was aborted.
    #[error("handler task failed: {0}")]
    Join(String),
}
