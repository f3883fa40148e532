//! Error types shared by the sensor and motor seams.

use thiserror::Error;

/// A failed read from a wheel encoder or heading sensor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    /// The encoder could not produce a rotation value.
    #[error("encoder read failed: {0}")]
    Encoder(String),
    /// The heading sensor could not produce an angle.
    #[error("heading sensor read failed: {0}")]
    Heading(String),
    /// The sensor returned a value that is not a finite number.
    #[error("sensor returned a non-finite value")]
    NonFinite,
}

/// Errors raised while driving the wheels.
#[derive(Debug, Error)]
pub enum MotorError {
    /// The motor driver rejected an output request.
    #[error("motor output rejected: {0}")]
    Output(String),
    /// The motor loop needed a sensor reading and did not get one.
    #[error(transparent)]
    Sensor(#[from] SensorError),
    /// A command was sent after the motor loop shut down.
    #[error("motor loop is not running")]
    NotRunning,
    /// The motor loop thread could not be started.
    #[error("failed to spawn motor loop thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The motor loop thread panicked.
    #[error("motor loop thread panicked")]
    Panicked,
}
