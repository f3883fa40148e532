use crate::error::MotorError;

/// Snapshot of a single wheel motor driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorState {
    /// Whether the motor is powered. `false` after [`WheelMotor::brake`].
    pub enabled: bool,
    /// Last normalized output applied, in `[-1.0, 1.0]`.
    /// - positive drives the robot forward
    /// - negative drives it backward
    pub output: f64,
}

/// Core trait defining the interface for one wheel's motor driver.
///
/// Implementations must be usable from the motor loop thread while other
/// threads hold a handle, hence `&self` receivers.
pub trait WheelMotor: Send + Sync {
    /// Apply a normalized output (duty cycle) in `[-1.0, 1.0]`.
    ///
    /// Values outside the range are clamped by the caller; drivers may reject
    /// them with [`MotorError::Output`].
    fn set_output(&self, output: f64) -> Result<(), MotorError>;

    /// Remove drive power and hold the wheel.
    fn brake(&self) -> Result<(), MotorError>;

    /// Get the current state of the motor
    fn state(&self) -> MotorState;
}

/// Wheel-velocity command sink consumed by the trajectory executor.
///
/// Velocities are wheel surface speeds in m/s, accelerations in m/s².
/// Implementations must not block the caller beyond a short critical section.
pub trait Actuator: Send + Sync {
    /// Command both wheels with velocity and feed-forward acceleration.
    fn set_wheel_velocity_and_accel(
        &self,
        left: f64,
        accel_left: f64,
        right: f64,
        accel_right: f64,
    ) -> Result<(), MotorError>;

    /// Command both wheels with velocity only.
    fn set_wheel_velocity(&self, left: f64, right: f64) -> Result<(), MotorError> {
        self.set_wheel_velocity_and_accel(left, 0.0, right, 0.0)
    }

    /// Stop both wheels.
    fn stop(&self) -> Result<(), MotorError>;
}

impl<T: WheelMotor + ?Sized> WheelMotor for std::sync::Arc<T> {
    fn set_output(&self, output: f64) -> Result<(), MotorError> {
        (**self).set_output(output)
    }

    fn brake(&self) -> Result<(), MotorError> {
        (**self).brake()
    }

    fn state(&self) -> MotorState {
        (**self).state()
    }
}

impl<T: Actuator + ?Sized> Actuator for std::sync::Arc<T> {
    fn set_wheel_velocity_and_accel(
        &self,
        left: f64,
        accel_left: f64,
        right: f64,
        accel_right: f64,
    ) -> Result<(), MotorError> {
        (**self).set_wheel_velocity_and_accel(left, accel_left, right, accel_right)
    }

    fn set_wheel_velocity(&self, left: f64, right: f64) -> Result<(), MotorError> {
        (**self).set_wheel_velocity(left, right)
    }

    fn stop(&self) -> Result<(), MotorError> {
        (**self).stop()
    }
}
