pub mod motor;
pub mod sim;

pub use motor::{FeedForwardGains, MotorLoop, WheelChannel};
pub use sim::{SimHeading, SimWheel, SimulatedDrivebase, SimulationConfig, Side};
