//! Hardware seams of a differential-drive robot.
//!
//! [`traits`] defines what the rest of the stack needs from the wheels and
//! sensors. [`devices`] provides the feed-forward [`MotorLoop`] that turns
//! wheel velocity setpoints into motor outputs, and a [`SimulatedDrivebase`]
//! that stands in for real hardware.

pub mod devices;
pub mod error;
pub mod traits;

pub use devices::{FeedForwardGains, MotorLoop, SimulatedDrivebase, SimulationConfig, WheelChannel};
pub use error::{MotorError, SensorError};
pub use traits::{Actuator, DualHeadingSensor, HeadingSensor, MotorState, WheelEncoder, WheelMotor};
