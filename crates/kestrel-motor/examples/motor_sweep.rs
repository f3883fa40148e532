use std::time::Duration;

use kestrel_kinematics::RobotKinematics;
use kestrel_motor::devices::sim::Side;
use kestrel_motor::{Actuator, FeedForwardGains, MotorLoop, SimulatedDrivebase, SimulationConfig, WheelChannel, WheelMotor};
use tracing::info;

const STEP_TIME: Duration = Duration::from_millis(250); // Time between speed changes
const MAX_SPEED: f64 = 0.8; // m/s
const STEPS: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    info!("Starting simulated wheel speed sweep...");

    let kinematics = RobotKinematics::new(0.3, 0.2, 1.0, 2.0)?;
    let base = SimulatedDrivebase::new(kinematics, SimulationConfig::default());
    let left = base.wheel(Side::Left);
    let right = base.wheel(Side::Right);

    let motor_loop = MotorLoop::spawn(
        WheelChannel { motor: std::sync::Arc::new(left.clone()), encoder: std::sync::Arc::new(left.clone()) },
        WheelChannel { motor: std::sync::Arc::new(right.clone()), encoder: std::sync::Arc::new(right) },
        FeedForwardGains { ks: 0.0, kv: 1.0, ka: 0.0, kp: 0.2 },
        kinematics.wheel_circumference(),
        Duration::from_millis(5),
    )?;
    info!("Motor loop initialized");

    // Forward with increasing speed, then reverse with decreasing speed
    let forward = (0..=STEPS).map(|i| MAX_SPEED * i as f64 / STEPS as f64);
    let reverse = (0..=STEPS).rev().map(|i| -MAX_SPEED * i as f64 / STEPS as f64);
    for speed in forward.chain(reverse) {
        info!("Setting speed: {speed:.2} m/s");
        motor_loop.set_wheel_velocity(speed, speed)?;
        std::thread::sleep(STEP_TIME);

        let state = left.state();
        info!(
            "Motor state: enabled={}, output={:.3}, pose={}",
            state.enabled,
            state.output,
            base.true_pose()
        );
    }

    info!("Stopping motors");
    motor_loop.stop()?;
    motor_loop.shutdown()?;
    Ok(())
}
