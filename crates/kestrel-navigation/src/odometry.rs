//! Dead-reckoning pose estimation from wheel encoders and a heading sensor.
//!
//! The odometry thread is the only writer of the [`SharedPose`]. Every
//! period it reads both encoders and the heading sensor, advances the pose
//! by the mean wheel travel along the midpoint heading, and commits the new
//! pose in one write. A failed or non-finite read is recorded as a fault
//! and ends the loop without committing anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use kestrel_kinematics::{Pose, RobotKinematics};
use kestrel_motor::{HeadingSensor, SensorError, WheelEncoder};
use parking_lot::{Mutex, RwLock};
use spin_sleep::SpinSleeper;
use tracing::{debug, error, info};

use crate::error::NavigationError;

#[derive(Debug, Clone, Default)]
struct PoseState {
    pose: Pose,
    fault: Option<SensorError>,
}

/// The robot's estimated pose, shared between the odometry thread and its
/// readers.
#[derive(Debug, Clone, Default)]
pub struct SharedPose {
    inner: Arc<RwLock<PoseState>>,
}

impl SharedPose {
    pub fn new(pose: Pose) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PoseState { pose, fault: None })),
        }
    }

    /// The latest committed pose.
    pub fn get(&self) -> Pose {
        self.inner.read().pose
    }

    /// The sensor fault that stopped odometry, if any.
    pub fn fault(&self) -> Option<SensorError> {
        self.inner.read().fault.clone()
    }

    pub(crate) fn set(&self, pose: Pose) {
        self.inner.write().pose = pose;
    }

    pub(crate) fn set_fault(&self, fault: Option<SensorError>) {
        self.inner.write().fault = fault;
    }
}

/// Whether the odometry thread is integrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdometryState {
    Stopped,
    Running,
}

/// Sensors read by the odometry loop.
#[derive(Clone)]
pub struct OdometrySensors {
    pub left: Arc<dyn WheelEncoder>,
    pub right: Arc<dyn WheelEncoder>,
    pub heading: Arc<dyn HeadingSensor>,
}

/// Pose estimator. Owns the odometry thread while running.
pub struct Odometry {
    sensors: OdometrySensors,
    kinematics: RobotKinematics,
    period: Duration,
    pose: SharedPose,
    /// Held while a pose is computed and committed, so a reset cannot land
    /// between the read and the write.
    commit: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<(), SensorError>>>>,
}

impl Odometry {
    pub fn new(sensors: OdometrySensors, kinematics: RobotKinematics, period: Duration) -> Self {
        Self {
            sensors,
            kinematics,
            period,
            pose: SharedPose::default(),
            commit: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Handle for readers of the pose.
    pub fn shared_pose(&self) -> SharedPose {
        self.pose.clone()
    }

    pub fn pose(&self) -> Pose {
        self.pose.get()
    }

    pub fn state(&self) -> OdometryState {
        match self.handle.lock().as_ref() {
            Some(handle) if !handle.is_finished() => OdometryState::Running,
            _ => OdometryState::Stopped,
        }
    }

    /// Start integrating from the current pose.
    ///
    /// # Errors
    ///
    /// [`NavigationError::AlreadyRunning`] if the loop is running, or an I/O
    /// error if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), NavigationError> {
        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            if !previous.is_finished() {
                *handle = Some(previous);
                return Err(NavigationError::AlreadyRunning);
            }
            // a loop that ended on a fault has already reported it
            let _ = previous.join();
        }

        self.pose.set_fault(None);
        self.running.store(true, Ordering::Release);
        let worker = Worker {
            sensors: self.sensors.clone(),
            kinematics: self.kinematics,
            period: self.period,
            pose: self.pose.clone(),
            commit: Arc::clone(&self.commit),
            running: Arc::clone(&self.running),
        };
        let spawned = std::thread::Builder::new().name("odometry".into()).spawn(move || worker.run());
        match spawned {
            Ok(spawned) => {
                *handle = Some(spawned);
                info!(pose = %self.pose.get(), period = ?self.period, "Odometry started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the loop and wait for it. The pose is kept.
    ///
    /// Returns the sensor fault that ended the loop early, if any.
    pub fn stop(&self) -> Result<(), NavigationError> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        let result = handle.join().map_err(|_| NavigationError::Panicked("odometry"))?;
        info!(pose = %self.pose.get(), "Odometry stopped");
        result.map_err(NavigationError::from)
    }

    /// Move the estimate to `pose` and re-bias the heading sensor to match.
    ///
    /// Safe to call while running; the next integration step starts from
    /// `pose`.
    pub fn reset(&self, pose: Pose) -> Result<(), NavigationError> {
        let _commit = self.commit.lock();
        self.sensors.heading.reset_heading(pose.theta)?;
        self.pose.set(pose);
        info!(%pose, "Odometry reset");
        Ok(())
    }
}

impl Drop for Odometry {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    sensors: OdometrySensors,
    kinematics: RobotKinematics,
    period: Duration,
    pose: SharedPose,
    commit: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) -> Result<(), SensorError> {
        let result = self.integrate();
        self.running.store(false, Ordering::Release);
        if let Err(ref e) = result {
            error!(error = %e, pose = %self.pose.get(), "Odometry stopped on sensor fault");
            self.pose.set_fault(Some(e.clone()));
        }
        result
    }

    fn integrate(&self) -> Result<(), SensorError> {
        let sleeper = SpinSleeper::new(100_000);
        let (mut last_left, mut last_right) = self.read_encoders()?;

        while self.running.load(Ordering::Acquire) {
            sleeper.sleep(self.period);

            let _commit = self.commit.lock();
            let (left, right) = self.read_encoders()?;
            let heading = finite(self.sensors.heading.heading_radians()?)?;

            let revolutions = ((left - last_left) + (right - last_right)) / 2.0;
            last_left = left;
            last_right = right;

            let distance = self.kinematics.rotations_to_distance(revolutions);
            let pose = RobotKinematics::integrate_displacement(self.pose.get(), distance, heading);
            self.pose.set(pose);
            debug!(x = pose.x, y = pose.y, theta = pose.theta, "Odometry update");
        }
        Ok(())
    }

    fn read_encoders(&self) -> Result<(f64, f64), SensorError> {
        Ok((
            finite(self.sensors.left.rotation()?)?,
            finite(self.sensors.right.rotation()?)?,
        ))
    }
}

fn finite(value: f64) -> Result<f64, SensorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SensorError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_motor::devices::{Side, SimulatedDrivebase, SimulationConfig};
    use kestrel_motor::WheelMotor;

    const PERIOD: Duration = Duration::from_millis(2);

    fn rig() -> (Arc<SimulatedDrivebase>, Odometry) {
        let kinematics = RobotKinematics::new(0.3, 0.2, 1.0, 2.0).unwrap();
        let base = SimulatedDrivebase::new(kinematics, SimulationConfig::default());
        let sensors = OdometrySensors {
            left: Arc::new(base.wheel(Side::Left)),
            right: Arc::new(base.wheel(Side::Right)),
            heading: Arc::new(base.heading_sensor()),
        };
        (base, Odometry::new(sensors, kinematics, PERIOD))
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (_base, odometry) = rig();
        assert_eq!(odometry.state(), OdometryState::Stopped);
        odometry.start().unwrap();
        assert_eq!(odometry.state(), OdometryState::Running);
        assert!(matches!(odometry.start(), Err(NavigationError::AlreadyRunning)));
        odometry.stop().unwrap();
        assert_eq!(odometry.state(), OdometryState::Stopped);
    }

    #[test]
    fn test_tracks_straight_drive() {
        let (base, odometry) = rig();
        odometry.start().unwrap();
        base.wheel(Side::Left).set_output(0.5).unwrap();
        base.wheel(Side::Right).set_output(0.5).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        base.wheel(Side::Left).brake().unwrap();
        base.wheel(Side::Right).brake().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        odometry.stop().unwrap();

        let truth = base.true_pose();
        let estimate = odometry.pose();
        assert!(truth.x > 0.05);
        assert!((estimate.x - truth.x).abs() < 5e-3);
        assert!((estimate.y - truth.y).abs() < 5e-3);

        // stopping keeps the pose
        assert_eq!(odometry.pose(), estimate);
    }

    #[test]
    fn test_reset_rebiases_heading() {
        let (base, odometry) = rig();
        odometry.reset(Pose::new(1.0, 2.0, 0.5)).unwrap();
        odometry.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        odometry.stop().unwrap();

        let pose = odometry.pose();
        assert!((pose.x - 1.0).abs() < 1e-9);
        assert!((pose.y - 2.0).abs() < 1e-9);
        assert!((pose.theta - 0.5).abs() < 1e-9);
        assert!((base.heading_sensor().heading_radians().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sensor_fault_stops_loop() {
        let (base, odometry) = rig();
        odometry.start().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let before = odometry.pose();
        base.set_sensor_fault(true);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(odometry.state(), OdometryState::Stopped);
        assert!(matches!(odometry.shared_pose().fault(), Some(SensorError::Encoder(_))));
        assert_eq!(odometry.pose(), before);
        assert!(matches!(odometry.stop(), Err(NavigationError::Sensor(SensorError::Encoder(_)))));

        // a restart after clearing the fault runs again
        base.set_sensor_fault(false);
        odometry.start().unwrap();
        assert!(odometry.shared_pose().fault().is_none());
        odometry.stop().unwrap();
    }
}
