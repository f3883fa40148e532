pub mod motor;
pub mod sensor;

pub use motor::{Actuator, MotorState, WheelMotor};
pub use sensor::{DualHeadingSensor, HeadingSensor, WheelEncoder};
