//! Profiled trajectories and their split into mission segments.

use kestrel_kinematics::{ChassisSpeeds, Pose};
use serde::Serialize;
use tracing::debug;

use crate::error::NavigationError;
use crate::events::{Marker, StopEvent};
use crate::path::Path;
use crate::spline::SplineLocation;

/// Marker distances within this of a waypoint count as reached.
const DISTANCE_EPSILON: f64 = 1e-9;

/// One sample of a profiled trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Waypoint {
    /// Time since the start of the trajectory (s).
    pub time: f64,
    pub x: f64,
    pub y: f64,
    /// Direction the robot faces (rad), in `(-PI, PI]`.
    pub heading: f64,
    /// Signed linear velocity (m/s). Negative while driving in reverse.
    pub velocity: f64,
    /// Angular velocity (rad/s), counter-clockwise positive.
    pub angular_velocity: f64,
    /// Left wheel acceleration (m/s²).
    pub left_accel: f64,
    /// Right wheel acceleration (m/s²).
    pub right_accel: f64,
    /// Arc length travelled along the path (m).
    pub distance: f64,
}

impl Waypoint {
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.heading)
    }

    pub fn chassis_speeds(&self) -> ChassisSpeeds {
        ChassisSpeeds::new(self.velocity, self.angular_velocity)
    }
}

/// A waypoint at which the robot is brought to rest on a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopMark {
    /// Index into the trajectory's waypoints.
    pub waypoint: usize,
    /// Index of the control point the robot stopped at.
    pub point: usize,
}

/// Time-ordered waypoints produced by the profiler.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Trajectory {
    waypoints: Vec<Waypoint>,
    stops: Vec<StopMark>,
}

impl Trajectory {
    /// # Errors
    ///
    /// Returns [`NavigationError::Profile`] if there are no waypoints, the
    /// times go backwards, or a stop mark points past the end.
    pub fn new(waypoints: Vec<Waypoint>, stops: Vec<StopMark>) -> Result<Self, NavigationError> {
        if waypoints.is_empty() {
            return Err(NavigationError::Profile("trajectory has no waypoints".into()));
        }
        if let Some(i) = waypoints.windows(2).position(|w| !(w[1].time >= w[0].time)) {
            return Err(NavigationError::Profile(format!("waypoint {} goes back in time", i + 1)));
        }
        if stops.iter().any(|s| s.waypoint >= waypoints.len()) {
            return Err(NavigationError::Profile("stop mark past the last waypoint".into()));
        }
        Ok(Self { waypoints, stops })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Where the robot comes to rest on a stop point, reversal or the end.
    pub fn stops(&self) -> &[StopMark] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn start_time(&self) -> f64 {
        self.waypoints.first().map_or(0.0, |w| w.time)
    }

    pub fn end_time(&self) -> f64 {
        self.waypoints.last().map_or(0.0, |w| w.time)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// Largest linear speed reached, ignoring direction.
    pub fn peak_velocity(&self) -> f64 {
        self.waypoints.iter().map(|w| w.velocity.abs()).fold(0.0, f64::max)
    }

    /// Time at which the trajectory first reaches `distance` along the path.
    pub fn time_at_distance(&self, distance: f64) -> f64 {
        self.waypoints
            .iter()
            .find(|w| w.distance >= distance - DISTANCE_EPSILON)
            .map_or(self.end_time(), |w| w.time)
    }

    pub fn cursor(&self) -> WaypointCursor<'_> {
        WaypointCursor {
            waypoints: &self.waypoints,
            index: 0,
        }
    }
}

/// Forward-only lookup of the reference waypoint for a time.
#[derive(Debug, Clone)]
pub struct WaypointCursor<'a> {
    waypoints: &'a [Waypoint],
    index: usize,
}

impl<'a> WaypointCursor<'a> {
    /// The first waypoint after `time`, or the last waypoint once `time` is
    /// past the end. Never moves backwards, even if `time` does.
    pub fn advance(&mut self, time: f64) -> &'a Waypoint {
        let last = self.waypoints.len().saturating_sub(1);
        while self.index < last && self.waypoints[self.index].time <= time {
            self.index += 1;
        }
        &self.waypoints[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// A stretch of trajectory driven without stopping, with the markers that
/// fire during it and the stop event run after it.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionSegment {
    pub trajectory: Trajectory,
    pub markers: Vec<Marker>,
    pub stop_event: Option<StopEvent>,
}

/// A complete run: segments separated by stops.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mission {
    segments: Vec<MissionSegment>,
}

impl Mission {
    /// Split `trajectory` at every stop and attach the path's stop events
    /// and markers.
    ///
    /// The waypoint at an interior stop ends one segment and starts the
    /// next. Markers are placed at the time the trajectory first reaches
    /// their location and belong to the first segment still running then.
    pub fn build(path: &Path, trajectory: Trajectory) -> Result<Self, NavigationError> {
        let waypoints = trajectory.waypoints();
        let last = waypoints.len() - 1;
        let mut segments = Vec::new();
        let mut start = 0;

        for stop in trajectory.stops() {
            if stop.waypoint <= start {
                continue;
            }
            segments.push(MissionSegment {
                trajectory: Trajectory::new(waypoints[start..=stop.waypoint].to_vec(), Vec::new())?,
                markers: Vec::new(),
                stop_event: path.points().get(stop.point).and_then(|p| p.stop_event.clone()),
            });
            start = stop.waypoint;
        }
        if start < last || segments.is_empty() {
            segments.push(MissionSegment {
                trajectory: Trajectory::new(waypoints[start..].to_vec(), Vec::new())?,
                markers: Vec::new(),
                stop_event: None,
            });
        }

        for marker in path.markers() {
            let distance = path.spline().length_between(SplineLocation::START, marker.location);
            let time = trajectory.time_at_distance(distance);
            let index = segments
                .iter()
                .position(|s| s.trajectory.end_time() >= time)
                .unwrap_or(segments.len() - 1);
            debug!(location = ?marker.location, distance, time, segment = index, "Marker placed");
            segments[index].markers.push(Marker {
                time,
                commands: marker.commands.clone(),
            });
        }

        Ok(Self { segments })
    }

    /// Assemble a mission from prepared segments.
    pub fn from_segments(segments: Vec<MissionSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[MissionSegment] {
        &self.segments
    }

    pub fn duration(&self) -> f64 {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => last.trajectory.end_time() - first.trajectory.start_time(),
            _ => 0.0,
        }
    }
}
