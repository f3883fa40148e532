//! Fixed-period wheel velocity loop.
//!
//! Each wheel is driven with a feed-forward model plus a proportional
//! correction on measured wheel speed:
//!
//! ```text
//! output = ks · sign(v) + kv · v + ka · a + kp · (v - v_measured)
//! ```
//!
//! clamped to `[-1, 1]`. The loop runs on its own thread and picks up the
//! latest setpoint on every period, so callers never wait on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use spin_sleep::SpinSleeper;
use tracing::{debug, error, info, warn};

use crate::error::MotorError;
use crate::traits::{Actuator, WheelEncoder, WheelMotor};

/// Feed-forward and proportional gains shared by both wheels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FeedForwardGains {
    /// Static friction term, applied with the sign of the demanded speed.
    pub ks: f64,
    /// Output per m/s.
    pub kv: f64,
    /// Output per m/s².
    pub ka: f64,
    /// Output per m/s of speed error.
    pub kp: f64,
}

impl FeedForwardGains {
    /// Normalized motor output for one wheel, clamped to `[-1, 1]`.
    pub fn output(&self, velocity: f64, acceleration: f64, measured: f64) -> f64 {
        let friction = if velocity == 0.0 { 0.0 } else { self.ks * velocity.signum() };
        let raw = friction + self.kv * velocity + self.ka * acceleration + self.kp * (velocity - measured);
        raw.clamp(-1.0, 1.0)
    }
}

/// One side of the drivebase: the motor and the encoder on the same wheel.
#[derive(Clone)]
pub struct WheelChannel {
    /// Motor driver for the wheel.
    pub motor: Arc<dyn WheelMotor>,
    /// Encoder on the same wheel.
    pub encoder: Arc<dyn WheelEncoder>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Setpoint {
    left: f64,
    accel_left: f64,
    right: f64,
    accel_right: f64,
    enabled: bool,
}

/// Handle to a running motor loop. Implements [`Actuator`].
///
/// Dropping the handle stops the loop and brakes both wheels.
pub struct MotorLoop {
    setpoint: Arc<Mutex<Setpoint>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<(), MotorError>>>>,
}

impl MotorLoop {
    /// Spawn the motor loop thread.
    ///
    /// # Arguments
    /// * `left`, `right` - Motor and encoder of each wheel.
    /// * `gains` - Feed-forward and proportional gains.
    /// * `wheel_circumference` - Converts encoder revolutions to metres.
    /// * `period` - Loop period.
    pub fn spawn(
        left: WheelChannel,
        right: WheelChannel,
        gains: FeedForwardGains,
        wheel_circumference: f64,
        period: Duration,
    ) -> Result<Self, MotorError> {
        let setpoint = Arc::new(Mutex::new(Setpoint::default()));
        let running = Arc::new(AtomicBool::new(true));

        let handle = std::thread::Builder::new().name("motor".into()).spawn({
            let setpoint = Arc::clone(&setpoint);
            let running = Arc::clone(&running);
            move || {
                let result = run_loop(&left, &right, gains, wheel_circumference, period, &setpoint, &running);
                // whatever happened, leave the wheels unpowered
                let _ = left.motor.brake();
                let _ = right.motor.brake();
                running.store(false, Ordering::Release);
                if let Err(ref e) = result {
                    error!(error = %e, "Motor loop stopped on error.");
                }
                result
            }
        })?;

        Ok(Self {
            setpoint,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the loop thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop, brake the wheels and wait for the thread to exit.
    ///
    /// Returns the error that ended the loop, if any.
    pub fn shutdown(&self) -> Result<(), MotorError> {
        self.running.store(false, Ordering::Release);
        match self.handle.lock().take() {
            Some(handle) => handle.join().map_err(|_| MotorError::Panicked)?,
            None => Ok(()),
        }
    }

    fn write(&self, setpoint: Setpoint) -> Result<(), MotorError> {
        if !self.is_running() {
            return Err(MotorError::NotRunning);
        }
        *self.setpoint.lock() = setpoint;
        Ok(())
    }
}

impl Actuator for MotorLoop {
    fn set_wheel_velocity_and_accel(
        &self,
        left: f64,
        accel_left: f64,
        right: f64,
        accel_right: f64,
    ) -> Result<(), MotorError> {
        self.write(Setpoint {
            left,
            accel_left,
            right,
            accel_right,
            enabled: true,
        })
    }

    fn stop(&self) -> Result<(), MotorError> {
        self.write(Setpoint::default())
    }
}

impl Drop for MotorLoop {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Motor loop reported an error during shutdown.");
        }
    }
}

fn run_loop(
    left: &WheelChannel,
    right: &WheelChannel,
    gains: FeedForwardGains,
    wheel_circumference: f64,
    period: Duration,
    setpoint: &Mutex<Setpoint>,
    running: &AtomicBool,
) -> Result<(), MotorError> {
    info!(?period, ?gains, "Motor loop started.");
    let sleeper = SpinSleeper::new(100_000);

    let mut last_left = left.encoder.rotation()?;
    let mut last_right = right.encoder.rotation()?;
    let mut last_tick = Instant::now();

    while running.load(Ordering::Acquire) {
        sleeper.sleep(period);

        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        let rotation_left = left.encoder.rotation()?;
        let rotation_right = right.encoder.rotation()?;
        let (measured_left, measured_right) = if dt > 0.0 {
            (
                (rotation_left - last_left) * wheel_circumference / dt,
                (rotation_right - last_right) * wheel_circumference / dt,
            )
        } else {
            (0.0, 0.0)
        };
        last_left = rotation_left;
        last_right = rotation_right;

        let target = *setpoint.lock();
        if !target.enabled {
            left.motor.brake()?;
            right.motor.brake()?;
            continue;
        }

        let out_left = gains.output(target.left, target.accel_left, measured_left);
        let out_right = gains.output(target.right, target.accel_right, measured_right);
        left.motor.set_output(out_left)?;
        right.motor.set_output(out_right)?;
        debug!(out_left, out_right, measured_left, measured_right, "Motor outputs applied");
    }

    info!("Motor loop stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use crate::traits::MotorState;

    const EPSILON: f64 = 1e-12;

    #[derive(Default)]
    struct RecordingMotor {
        state: Mutex<MotorState>,
    }

    impl WheelMotor for RecordingMotor {
        fn set_output(&self, output: f64) -> Result<(), MotorError> {
            *self.state.lock() = MotorState { enabled: true, output };
            Ok(())
        }

        fn brake(&self) -> Result<(), MotorError> {
            *self.state.lock() = MotorState::default();
            Ok(())
        }

        fn state(&self) -> MotorState {
            *self.state.lock()
        }
    }

    struct StillEncoder;

    impl WheelEncoder for StillEncoder {
        fn rotation(&self) -> Result<f64, SensorError> {
            Ok(0.0)
        }
    }

    struct BrokenEncoder;

    impl WheelEncoder for BrokenEncoder {
        fn rotation(&self) -> Result<f64, SensorError> {
            Err(SensorError::Encoder("cable".into()))
        }
    }

    fn gains() -> FeedForwardGains {
        FeedForwardGains { ks: 0.05, kv: 1.5, ka: 0.1, kp: 0.5 }
    }

    #[test]
    fn test_feed_forward_output() {
        let out = gains().output(0.4, 1.0, 0.3);
        assert!((out - (0.05 + 0.6 + 0.1 + 0.05)).abs() < EPSILON);

        let reverse = gains().output(-0.4, 0.0, -0.4);
        assert!((reverse - (-0.05 - 0.6)).abs() < EPSILON);

        assert_eq!(gains().output(0.0, 0.0, 0.0), 0.0);
        assert_eq!(gains().output(5.0, 0.0, 0.0), 1.0);
        assert_eq!(gains().output(-5.0, 0.0, 0.0), -1.0);
    }

    #[test]
    fn test_loop_applies_setpoint_and_stops() {
        let left_motor = Arc::new(RecordingMotor::default());
        let right_motor = Arc::new(RecordingMotor::default());
        let motor_loop = MotorLoop::spawn(
            WheelChannel { motor: left_motor.clone(), encoder: Arc::new(StillEncoder) },
            WheelChannel { motor: right_motor.clone(), encoder: Arc::new(StillEncoder) },
            FeedForwardGains { ks: 0.0, kv: 1.0, ka: 0.0, kp: 0.0 },
            0.2,
            Duration::from_millis(2),
        )
        .unwrap();

        motor_loop.set_wheel_velocity(0.25, -0.5).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!((left_motor.state().output - 0.25).abs() < EPSILON);
        assert!((right_motor.state().output + 0.5).abs() < EPSILON);

        motor_loop.stop().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!left_motor.state().enabled);
        assert!(!right_motor.state().enabled);

        motor_loop.shutdown().unwrap();
        assert!(matches!(motor_loop.set_wheel_velocity(0.1, 0.1), Err(MotorError::NotRunning)));
    }

    #[test]
    fn test_loop_exits_on_encoder_fault() {
        let motor = Arc::new(RecordingMotor::default());
        let motor_loop = MotorLoop::spawn(
            WheelChannel { motor: motor.clone(), encoder: Arc::new(BrokenEncoder) },
            WheelChannel { motor: motor.clone(), encoder: Arc::new(StillEncoder) },
            gains(),
            0.2,
            Duration::from_millis(2),
        )
        .unwrap();

        let result = motor_loop.shutdown();
        assert!(matches!(result, Err(MotorError::Sensor(SensorError::Encoder(_)))));
        assert!(!motor_loop.is_running());
        assert!(!motor.state().enabled);
    }
}
