//! Closed-loop execution of a mission.
//!
//! Each segment is tracked on a fixed-period ticker: look up the reference
//! waypoint for the elapsed time, correct towards it with RAMSETE, and send
//! the wheel command to the actuator. Markers of the segment fire from their
//! own task in the meantime. After a segment the robot is at rest and the
//! segment's stop event runs before the next one starts.
//!
//! Every loop carries the run's [`RunToken`]. [`TrajectoryExecutor::cancel`]
//! stops the wheels within one period and nothing further is started for
//! that run.

use std::sync::Arc;
use std::time::Duration;

use kestrel_kinematics::{Pose, Ramsete, RobotKinematics};
use kestrel_motor::Actuator;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::command::CommandTable;
use crate::error::NavigationError;
use crate::events::{CommandFailure, Detached, MarkerDispatcher};
use crate::odometry::SharedPose;
use crate::run::{RunControl, RunId, RunToken};
use crate::trajectory::{Mission, MissionSegment, Waypoint};

/// Tracking loop tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    /// Tracking loop period.
    pub period: Duration,
    /// Wheel velocity added per m/s² of reference wheel acceleration.
    pub accel_gain: f64,
    /// Keep every tick in the report's log.
    pub log_samples: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(10),
            accel_gain: 0.0,
            log_samples: true,
        }
    }
}

/// One tick of the tracking loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackingSample {
    /// Trajectory time of the tick (s).
    pub time: f64,
    pub segment: usize,
    pub pose: Pose,
    pub reference: Waypoint,
    /// Commanded left wheel speed (m/s).
    pub left: f64,
    /// Commanded right wheel speed (m/s).
    pub right: f64,
}

/// What happened during [`TrajectoryExecutor::run_mission`].
#[derive(Debug, Clone, Serialize)]
pub struct MissionReport {
    pub run_id: RunId,
    pub log: Vec<TrackingSample>,
    /// Ticks executed, whether or not they were logged.
    pub sample_count: usize,
    /// Stop-event and marker commands that failed.
    pub command_failures: Vec<CommandFailure>,
    pub cancelled: bool,
    /// Segments tracked to the end with their stop event done.
    pub segments_completed: usize,
}

impl MissionReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            log: Vec::new(),
            sample_count: 0,
            command_failures: Vec::new(),
            cancelled: false,
            segments_completed: 0,
        }
    }
}

/// Drives missions on one robot.
pub struct TrajectoryExecutor {
    actuator: Arc<dyn Actuator>,
    pose: SharedPose,
    kinematics: RobotKinematics,
    controller: Ramsete,
    commands: Arc<CommandTable>,
    config: ExecutorConfig,
    runs: RunControl,
}

impl TrajectoryExecutor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        pose: SharedPose,
        kinematics: RobotKinematics,
        controller: Ramsete,
        commands: Arc<CommandTable>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            actuator,
            pose,
            kinematics,
            controller,
            commands,
            config,
            runs: RunControl::new(),
        }
    }

    /// Handle for cancelling runs from elsewhere, e.g. a signal handler.
    pub fn run_control(&self) -> RunControl {
        self.runs.clone()
    }

    /// Cancel the active mission, if any.
    pub fn cancel(&self) {
        self.runs.cancel();
    }

    pub fn pose(&self) -> Pose {
        self.pose.get()
    }

    /// Drive every segment of `mission` in order.
    ///
    /// Cancellation is reported in the returned report, not as an error.
    ///
    /// # Errors
    ///
    /// A sensor fault from odometry or a rejected wheel command ends the
    /// mission; the wheels are stopped and the run is cancelled first.
    pub async fn run_mission(&self, mission: &Mission) -> Result<MissionReport, NavigationError> {
        let token = self.runs.begin();
        info!(
            run = %token.id(),
            segments = mission.segments().len(),
            duration = mission.duration(),
            "Mission started"
        );

        let mut report = MissionReport::new(token.id());
        let mut detached = Vec::new();
        let result = self.drive(mission, &token, &mut report, &mut detached).await;

        if let Err(e) = self.actuator.stop() {
            warn!(error = %e, "Failed to stop wheels after mission");
        }
        if let Err(ref e) = result {
            warn!(run = %token.id(), error = %e, "Mission aborted");
            token.cancel();
        }
        for handle in detached {
            match handle.await {
                Ok(failures) => report.command_failures.extend(failures),
                Err(e) => warn!(error = %e, "Background command task failed"),
            }
        }
        token.cancel();
        result?;

        info!(
            run = %report.run_id,
            cancelled = report.cancelled,
            segments_completed = report.segments_completed,
            samples = report.sample_count,
            failures = report.command_failures.len(),
            "Mission finished"
        );
        Ok(report)
    }

    async fn drive(
        &self,
        mission: &Mission,
        token: &RunToken,
        report: &mut MissionReport,
        detached: &mut Vec<Detached>,
    ) -> Result<(), NavigationError> {
        for (index, segment) in mission.segments().iter().enumerate() {
            let origin = Instant::now();
            if !segment.markers.is_empty() {
                let dispatcher = MarkerDispatcher::new(
                    segment.markers.clone(),
                    Arc::clone(&self.commands),
                    token.clone(),
                    origin,
                    segment.trajectory.start_time(),
                );
                detached.push(dispatcher.spawn());
            }

            if !self.track(index, segment, token, origin, report).await? {
                report.cancelled = true;
                return Ok(());
            }

            if let Some(stop_event) = &segment.stop_event {
                let outcome = stop_event.run(&self.commands, token).await;
                report.command_failures.extend(outcome.failures);
                detached.extend(outcome.detached);
                if outcome.cancelled {
                    report.cancelled = true;
                    return Ok(());
                }
            }
            report.segments_completed += 1;
        }
        Ok(())
    }

    /// Track one segment. Returns `false` if the run was cancelled.
    async fn track(
        &self,
        index: usize,
        segment: &MissionSegment,
        token: &RunToken,
        origin: Instant,
        report: &mut MissionReport,
    ) -> Result<bool, NavigationError> {
        let trajectory = &segment.trajectory;
        let mut cursor = trajectory.cursor();
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(
            segment = index,
            start = trajectory.start_time(),
            end = trajectory.end_time(),
            markers = segment.markers.len(),
            "Tracking segment"
        );

        loop {
            ticker.tick().await;
            if !token.is_active() {
                self.actuator.stop()?;
                info!(segment = index, waypoint = cursor.index(), "Tracking cancelled");
                return Ok(false);
            }
            if let Some(fault) = self.pose.fault() {
                return Err(fault.into());
            }

            let now = trajectory.start_time() + origin.elapsed().as_secs_f64();
            let reference = cursor.advance(now);
            let pose = self.pose.get();
            let wheels = self.controller.wheel_speeds(
                &self.kinematics,
                pose,
                reference.pose(),
                reference.chassis_speeds(),
            );
            let left = wheels.left + self.config.accel_gain * reference.left_accel;
            let right = wheels.right + self.config.accel_gain * reference.right_accel;
            self.actuator
                .set_wheel_velocity_and_accel(left, reference.left_accel, right, reference.right_accel)?;

            report.sample_count += 1;
            if self.config.log_samples {
                report.log.push(TrackingSample {
                    time: now,
                    segment: index,
                    pose,
                    reference: *reference,
                    left,
                    right,
                });
            }

            if now > trajectory.end_time() {
                break;
            }
        }

        self.actuator.stop()?;
        debug!(segment = index, pose = %self.pose.get(), "Segment finished");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind};
    use crate::events::{Marker, StopEvent};
    use crate::trajectory::Trajectory;
    use kestrel_motor::{MotorError, SensorError};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Drive { left: f64, right: f64 },
        Stop,
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Call>>);

    impl Actuator for Recorder {
        fn set_wheel_velocity_and_accel(&self, left: f64, _: f64, right: f64, _: f64) -> Result<(), MotorError> {
            self.0.lock().push(Call::Drive { left, right });
            Ok(())
        }

        fn stop(&self) -> Result<(), MotorError> {
            self.0.lock().push(Call::Stop);
            Ok(())
        }
    }

    fn hold(from: f64, to: f64) -> Trajectory {
        let waypoints = vec![
            Waypoint {
                time: from,
                ..Waypoint::default()
            },
            Waypoint {
                time: to,
                ..Waypoint::default()
            },
        ];
        Trajectory::new(waypoints, Vec::new()).unwrap()
    }

    fn executor(actuator: Arc<Recorder>, pose: SharedPose) -> TrajectoryExecutor {
        TrajectoryExecutor::new(
            actuator,
            pose,
            RobotKinematics::new(0.3, 0.2, 1.0, 1.0).unwrap(),
            Ramsete::new(2.0, 0.7).unwrap(),
            Arc::new(CommandTable::with_defaults()),
            ExecutorConfig {
                period: Duration::from_millis(5),
                ..ExecutorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_runs_segments_and_collects_failures() {
        let actuator = Arc::new(Recorder::default());
        let executor = executor(actuator.clone(), SharedPose::default());
        let mission = Mission::from_segments(vec![
            MissionSegment {
                trajectory: hold(0.0, 0.05),
                markers: vec![Marker {
                    time: 0.01,
                    commands: vec![Command::Log { message: "marker".into() }],
                }],
                stop_event: Some(StopEvent {
                    commands: vec![Command::Attachment {
                        name: "arm".into(),
                        rotations: 1.0,
                    }],
                    ..StopEvent::default()
                }),
            },
            MissionSegment {
                trajectory: hold(0.05, 0.1),
                markers: Vec::new(),
                stop_event: None,
            },
        ]);

        let report = executor.run_mission(&mission).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.segments_completed, 2);
        assert!(report.sample_count >= 2);
        assert_eq!(report.log.len(), report.sample_count);
        assert!(report.log.iter().any(|s| s.segment == 1));

        // no attachment handler is registered
        assert_eq!(report.command_failures.len(), 1);
        assert!(report.command_failures[0].error.contains(&format!("{:?}", CommandKind::Attachment)));

        // the robot sits on the reference, so every command is zero
        let calls = actuator.0.lock().clone();
        assert_eq!(calls.last(), Some(&Call::Stop));
        assert!(calls.iter().all(|c| match c {
            Call::Drive { left, right } => left.abs() < 1e-12 && right.abs() < 1e-12,
            Call::Stop => true,
        }));
        assert_eq!(executor.run_control().active(), None);
    }

    #[tokio::test]
    async fn test_cancel_during_marker_reports_no_failure() {
        let actuator = Arc::new(Recorder::default());
        let executor = executor(actuator.clone(), SharedPose::default());
        let mission = Mission::from_segments(vec![MissionSegment {
            trajectory: hold(0.0, 5.0),
            markers: vec![Marker {
                time: 0.0,
                commands: vec![Command::Wait { seconds: 10.0 }],
            }],
            stop_event: None,
        }]);

        let control = executor.run_control();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            control.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(2), executor.run_mission(&mission))
            .await
            .unwrap()
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.segments_completed, 0);
        assert!(report.command_failures.is_empty(), "{:?}", report.command_failures);
        assert_eq!(actuator.0.lock().last(), Some(&Call::Stop));
    }

    #[tokio::test]
    async fn test_sensor_fault_aborts_mission() {
        let actuator = Arc::new(Recorder::default());
        let pose = SharedPose::default();
        pose.set_fault(Some(SensorError::Heading("gone".into())));
        let executor = executor(actuator.clone(), pose);
        let mission = Mission::from_segments(vec![MissionSegment {
            trajectory: hold(0.0, 1.0),
            markers: Vec::new(),
            stop_event: None,
        }]);

        let result = executor.run_mission(&mission).await;
        assert!(matches!(result, Err(NavigationError::Sensor(SensorError::Heading(_)))));
        assert_eq!(actuator.0.lock().last(), Some(&Call::Stop));
        assert_eq!(executor.run_control().active(), None);
    }
}
