use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_kinematics::{Pose, Ramsete, RobotKinematics};
use kestrel_motor::devices::Side;
use kestrel_motor::{
    Actuator, FeedForwardGains, MotorError, MotorLoop, SimulatedDrivebase, SimulationConfig, WheelChannel,
};
use kestrel_navigation::{
    Command, CommandError, CommandHandler, CommandKind, CommandTable, DEFAULT_ARC_STEP, ExecutorConfig, Mission,
    Odometry, OdometrySensors, Path, ProfilerConfig, RunToken, SharedPose, TrajectoryExecutor, profile,
};
use parking_lot::Mutex;

const PERIOD: Duration = Duration::from_millis(10);

/// Straight out along x with a stop at 1 m, then a left bend to (2, 1).
const PATH: &str = r#"{
    "waypoints": [
        {"anchorPoint": {"x": 0.0, "y": 0.0}, "nextControl": {"x": 0.4, "y": 0.0}},
        {"anchorPoint": {"x": 1.0, "y": 0.0}, "prevControl": {"x": 0.6, "y": 0.0}, "nextControl": {"x": 1.5, "y": 0.0},
         "isStopPoint": true,
         "stopEvent": {"commands": [{"type": "attachment", "name": "gripper", "rotations": 0.5}],
                       "executionBehavior": "sequential", "waitBehavior": "after", "waitTime": 0.1}},
        {"anchorPoint": {"x": 2.0, "y": 1.0}, "prevControl": {"x": 2.0, "y": 0.5},
         "stopEvent": {"commands": [{"type": "log", "message": "done"}]}}
    ],
    "markers": [
        {"position": 0.5, "commands": [{"type": "attachment", "name": "lift", "rotations": 1.0}]},
        {"position": 1.5, "commands": [{"type": "attachment", "name": "lower", "rotations": -1.0}]}
    ]
}"#;

#[derive(Default)]
struct Attachments(Mutex<Vec<String>>);

impl Attachments {
    fn names(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl CommandHandler for Attachments {
    fn execute(&self, command: &Command, _token: &RunToken) -> Result<(), CommandError> {
        if let Command::Attachment { name, .. } = command {
            self.0.lock().push(name.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Call {
    Drive,
    Stop,
}

#[derive(Default)]
struct RecordingActuator(Mutex<Vec<(Instant, Call)>>);

impl Actuator for RecordingActuator {
    fn set_wheel_velocity_and_accel(&self, _: f64, _: f64, _: f64, _: f64) -> Result<(), MotorError> {
        self.0.lock().push((Instant::now(), Call::Drive));
        Ok(())
    }

    fn stop(&self) -> Result<(), MotorError> {
        self.0.lock().push((Instant::now(), Call::Stop));
        Ok(())
    }
}

fn robot() -> RobotKinematics {
    RobotKinematics::new(0.3, 0.2, 1.0, 1.5).unwrap()
}

fn commands(attachments: &Arc<Attachments>) -> Arc<CommandTable> {
    let mut table = CommandTable::with_defaults();
    table.register(CommandKind::Attachment, attachments.clone());
    Arc::new(table)
}

fn mission() -> (Path, Mission) {
    let path = Path::from_json(PATH, DEFAULT_ARC_STEP).unwrap();
    let trajectory = profile(&path, &robot(), &ProfilerConfig::default()).unwrap();
    let mission = Mission::build(&path, trajectory).unwrap();
    (path, mission)
}

#[test]
fn test_mission_splits_at_stop_point() {
    let (_path, mission) = mission();
    let segments = mission.segments();
    assert_eq!(segments.len(), 2);

    let first = segments[0].trajectory.waypoints();
    let second = segments[1].trajectory.waypoints();
    // the stop waypoint ends one segment and starts the next
    assert_eq!(first.last(), second.first());
    assert_eq!(first.last().unwrap().velocity, 0.0);
    assert!((first.last().unwrap().x - 1.0).abs() < 1e-6);

    assert!(segments[0].stop_event.is_some());
    assert!(segments[1].stop_event.is_some());

    assert_eq!(segments[0].markers.len(), 1);
    assert_eq!(segments[1].markers.len(), 1);
    for segment in segments {
        for marker in &segment.markers {
            assert!(marker.time >= segment.trajectory.start_time());
            assert!(marker.time <= segment.trajectory.end_time());
        }
    }
    assert!((mission.duration() - segments[1].trajectory.end_time()).abs() < 1e-12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stops_wheels_within_one_period() {
    let (_path, mission) = mission();
    let actuator = Arc::new(RecordingActuator::default());
    let attachments = Arc::new(Attachments::default());
    let executor = Arc::new(TrajectoryExecutor::new(
        actuator.clone(),
        SharedPose::new(Pose::default()),
        robot(),
        Ramsete::new(2.0, 0.7).unwrap(),
        commands(&attachments),
        ExecutorConfig {
            period: PERIOD,
            ..ExecutorConfig::default()
        },
    ));

    let run = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run_mission(&mission).await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    let cancelled_at = Instant::now();
    executor.cancel();

    let report = run.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.segments_completed, 0);

    let calls = actuator.0.lock().clone();
    let (stopped_at, _) = calls
        .iter()
        .find(|(at, call)| *at >= cancelled_at && *call == Call::Stop)
        .copied()
        .unwrap();
    assert!(stopped_at - cancelled_at <= PERIOD + Duration::from_millis(20));
    assert!(!calls.iter().any(|(at, call)| *at > stopped_at && *call == Call::Drive));

    // the first marker is most of a second in; the stop event never runs
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(attachments.names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drives_mission_on_simulator() {
    let kinematics = robot();
    let base = SimulatedDrivebase::new(kinematics, SimulationConfig::default());
    let channel = |side| WheelChannel {
        motor: Arc::new(base.wheel(side)),
        encoder: Arc::new(base.wheel(side)),
    };
    let motors = Arc::new(
        MotorLoop::spawn(
            channel(Side::Left),
            channel(Side::Right),
            FeedForwardGains {
                ks: 0.0,
                kv: 1.0,
                ka: 0.0,
                kp: 0.5,
            },
            kinematics.wheel_circumference(),
            Duration::from_millis(2),
        )
        .unwrap(),
    );
    let odometry = Odometry::new(
        OdometrySensors {
            left: Arc::new(base.wheel(Side::Left)),
            right: Arc::new(base.wheel(Side::Right)),
            heading: Arc::new(base.heading_sensor()),
        },
        kinematics,
        Duration::from_millis(2),
    );
    odometry.start().unwrap();

    let attachments = Arc::new(Attachments::default());
    let executor = TrajectoryExecutor::new(
        motors.clone(),
        odometry.shared_pose(),
        kinematics,
        Ramsete::new(2.0, 0.7).unwrap(),
        commands(&attachments),
        ExecutorConfig {
            period: PERIOD,
            accel_gain: 0.0,
            log_samples: true,
        },
    );

    let (path, mission) = mission();
    let report = executor.run_mission(&mission).await.unwrap();
    odometry.stop().unwrap();
    motors.shutdown().unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.segments_completed, 2);
    assert!(report.command_failures.is_empty());
    assert_eq!(attachments.names(), vec!["lift", "gripper", "lower"]);

    let end = path.spline().position(path.spline().end());
    let truth = base.true_pose();
    assert!((truth.x - end.x).abs() < 0.1, "{truth}");
    assert!((truth.y - end.y).abs() < 0.1, "{truth}");
    assert!((executor.pose().x - truth.x).abs() < 0.02);
}
