#![warn(missing_docs)]

//! Error types for the kinematics library.
//!
//! This module defines error types that can occur while constructing robot
//! descriptions and during kinematic calculations.

use core::fmt;

/// Errors that can occur in kinematic calculations.
#[derive(Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// Error for invalid track width.
    /// This variant is returned when the distance between the wheels is not positive.
    InvalidTrackWidth(&'static str),
    /// Error for invalid wheel circumference.
    /// This variant is returned when a wheel circumference is provided that is not positive.
    InvalidWheelCircumference(&'static str),
    /// Error for an invalid velocity or acceleration limit.
    /// This variant is returned when a limit is not finite and positive.
    InvalidLimit(&'static str),
    /// Error for invalid controller gains.
    /// This variant is returned when RAMSETE gains are outside their admissible ranges.
    InvalidGain(&'static str),
    /// Error for negative time delta.
    /// This variant is returned when a negative time delta is used for pose updates.
    NegativeTimeDelta(&'static str),
}

impl core::fmt::Display for KinematicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KinematicsError::InvalidTrackWidth(msg) => write!(f, "Invalid track width: {}", msg),
            KinematicsError::InvalidWheelCircumference(msg) => {
                write!(f, "Invalid wheel circumference: {}", msg)
            }
            KinematicsError::InvalidLimit(msg) => write!(f, "Invalid drive limit: {}", msg),
            KinematicsError::InvalidGain(msg) => write!(f, "Invalid controller gain: {}", msg),
            KinematicsError::NegativeTimeDelta(msg) => write!(f, "Negative time delta: {}", msg),
        }
    }
}

impl core::error::Error for KinematicsError {}
