//! Path following for a differential-drive robot.
//!
//! The pipeline, offline then online:
//!
//! 1. [`Path`] loads and validates an authored Bézier path with its motion
//!    events, stop events and markers.
//! 2. [`profile`] turns it into a time-stepped [`Trajectory`] that respects
//!    the robot's speed, acceleration and curvature limits.
//! 3. [`Mission::build`] splits the trajectory at every stop and attaches
//!    stop events and timed markers.
//! 4. [`TrajectoryExecutor::run_mission`] tracks each segment against the
//!    pose published by [`Odometry`].

pub mod bezier;
pub mod command;
pub mod error;
pub mod events;
pub mod executor;
pub mod odometry;
pub mod path;
pub mod profiler;
pub mod run;
pub mod spline;
pub mod trajectory;

pub use bezier::CubicBezier;
pub use command::{Command, CommandHandler, CommandKind, CommandTable};
pub use error::{CommandError, NavigationError};
pub use events::{CommandFailure, ExecutionMode, Marker, MarkerDispatcher, StopEvent, WaitPolicy};
pub use executor::{ExecutorConfig, MissionReport, TrackingSample, TrajectoryExecutor};
pub use odometry::{Odometry, OdometrySensors, OdometryState, SharedPose};
pub use path::{ControlPoint, MotionEvent, Path, PathLimits, PathMarker, PathPoint};
pub use profiler::{ProfilerConfig, profile};
pub use run::{RunControl, RunId, RunToken};
pub use spline::{DEFAULT_ARC_STEP, Spline, SplineLocation};
pub use trajectory::{Mission, MissionSegment, StopMark, Trajectory, Waypoint, WaypointCursor};
