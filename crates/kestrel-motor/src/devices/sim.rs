//! A simulated differential drivebase.
//!
//! Motor outputs are mapped linearly to wheel surface speed and integrated
//! lazily whenever any handle reads or writes the drivebase. Encoders report
//! how far each wheel turned; the ground pose moves by a randomly slipped
//! fraction of that, so odometry drifts the way it does on carpet. The
//! heading sensor reports the true heading.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use kestrel_kinematics::{Pose, RobotKinematics, WheelSpeeds};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MotorError, SensorError};
use crate::traits::{HeadingSensor, MotorState, WheelEncoder, WheelMotor};

/// Longest interval integrated in a single step (s).
const MAX_STEP: f64 = 0.001;

/// Tunables of the simulated drivebase.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Wheel surface speed at full output (m/s).
    pub max_wheel_speed: f64,
    /// Largest fraction of wheel travel lost to slip, in `[0, 1)`.
    pub slip: f64,
    /// Seed of the slip noise.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_wheel_speed: 1.0,
            slip: 0.0,
            seed: 0,
        }
    }
}

/// Which wheel a [`SimWheel`] handle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimMotor {
    state: MotorState,
    /// Wheel travel since start (m), as the encoder sees it.
    travel: f64,
}

struct SimState {
    pose: Pose,
    left: SimMotor,
    right: SimMotor,
    heading_offset: f64,
    last_update: Instant,
    rng: StdRng,
}

/// Shared simulation of the robot body. Hand out [`SimWheel`] and
/// [`SimHeading`] handles to the motor loop and odometry.
pub struct SimulatedDrivebase {
    kinematics: RobotKinematics,
    config: SimulationConfig,
    state: Mutex<SimState>,
    fault: AtomicBool,
}

impl SimulatedDrivebase {
    /// Create a drivebase at the origin with both motors braked.
    pub fn new(kinematics: RobotKinematics, config: SimulationConfig) -> Arc<Self> {
        let slip = if (0.0..1.0).contains(&config.slip) {
            config.slip
        } else {
            warn!(slip = config.slip, "Slip outside [0, 1), disabling slip.");
            0.0
        };
        Arc::new(Self {
            kinematics,
            config: SimulationConfig { slip, ..config },
            state: Mutex::new(SimState {
                pose: Pose::default(),
                left: SimMotor::default(),
                right: SimMotor::default(),
                heading_offset: 0.0,
                last_update: Instant::now(),
                rng: StdRng::seed_from_u64(config.seed),
            }),
            fault: AtomicBool::new(false),
        })
    }

    /// Handle driving one wheel and reading its encoder.
    pub fn wheel(self: &Arc<Self>, side: Side) -> SimWheel {
        SimWheel {
            base: Arc::clone(self),
            side,
        }
    }

    /// Handle reading the simulated gyro.
    pub fn heading_sensor(self: &Arc<Self>) -> SimHeading {
        SimHeading {
            base: Arc::clone(self),
        }
    }

    /// Ground-truth pose, for comparing against odometry.
    pub fn true_pose(&self) -> Pose {
        let mut state = self.state.lock();
        self.advance(&mut state);
        state.pose
    }

    /// Make every encoder and heading read fail until cleared.
    pub fn set_sensor_fault(&self, faulted: bool) {
        self.fault.store(faulted, Ordering::Release);
    }

    fn check_fault(&self, error: SensorError) -> Result<(), SensorError> {
        if self.fault.load(Ordering::Acquire) {
            Err(error)
        } else {
            Ok(())
        }
    }

    fn wheel_speed(&self, motor: &SimMotor) -> f64 {
        if motor.state.enabled {
            motor.state.output.clamp(-1.0, 1.0) * self.config.max_wheel_speed
        } else {
            0.0
        }
    }

    fn advance(&self, state: &mut SimState) {
        let now = Instant::now();
        let mut remaining = now.duration_since(state.last_update).as_secs_f64();
        state.last_update = now;

        let left = self.wheel_speed(&state.left);
        let right = self.wheel_speed(&state.right);
        if left == 0.0 && right == 0.0 {
            return;
        }

        while remaining > 0.0 {
            let dt = remaining.min(MAX_STEP);
            remaining -= dt;

            state.left.travel += left * dt;
            state.right.travel += right * dt;

            let slip_left = 1.0 - self.config.slip * state.rng.random::<f64>();
            let slip_right = 1.0 - self.config.slip * state.rng.random::<f64>();
            let ground = WheelSpeeds::new(left * slip_left, right * slip_right);
            // dt is never negative here, so integration cannot fail
            if let Ok(pose) = self.kinematics.update_pose_from_wheel_speeds(state.pose, ground, dt) {
                state.pose = pose;
            }
        }
    }
}

/// One wheel of a [`SimulatedDrivebase`]: both its motor and its encoder.
#[derive(Clone)]
pub struct SimWheel {
    base: Arc<SimulatedDrivebase>,
    side: Side,
}

impl SimWheel {
    fn with_motor<R>(&self, f: impl FnOnce(&mut SimMotor) -> R) -> R {
        let mut state = self.base.state.lock();
        self.base.advance(&mut state);
        match self.side {
            Side::Left => f(&mut state.left),
            Side::Right => f(&mut state.right),
        }
    }
}

impl WheelMotor for SimWheel {
    fn set_output(&self, output: f64) -> Result<(), MotorError> {
        if !output.is_finite() {
            return Err(MotorError::Output(format!("non-finite output {output}")));
        }
        self.with_motor(|motor| {
            motor.state = MotorState {
                enabled: true,
                output: output.clamp(-1.0, 1.0),
            };
        });
        Ok(())
    }

    fn brake(&self) -> Result<(), MotorError> {
        self.with_motor(|motor| motor.state = MotorState::default());
        debug!(side = ?self.side, "Simulated wheel braked");
        Ok(())
    }

    fn state(&self) -> MotorState {
        self.with_motor(|motor| motor.state)
    }
}

impl WheelEncoder for SimWheel {
    fn rotation(&self) -> Result<f64, SensorError> {
        self.base
            .check_fault(SensorError::Encoder("simulated fault".into()))?;
        let travel = self.with_motor(|motor| motor.travel);
        Ok(travel / self.base.kinematics.wheel_circumference())
    }
}

/// The gyro of a [`SimulatedDrivebase`].
#[derive(Clone)]
pub struct SimHeading {
    base: Arc<SimulatedDrivebase>,
}

impl HeadingSensor for SimHeading {
    fn heading_radians(&self) -> Result<f64, SensorError> {
        self.base
            .check_fault(SensorError::Heading("simulated fault".into()))?;
        let mut state = self.base.state.lock();
        self.base.advance(&mut state);
        Ok(Pose::normalize_angle(state.pose.theta + state.heading_offset))
    }

    fn reset_heading(&self, angle: f64) -> Result<(), SensorError> {
        self.base
            .check_fault(SensorError::Heading("simulated fault".into()))?;
        let mut state = self.base.state.lock();
        self.base.advance(&mut state);
        state.heading_offset = angle - state.pose.theta;
        Ok(())
    }
}
