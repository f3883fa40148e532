//! Authored paths: control points, motion events, stop events and markers.
//!
//! Paths are loaded from the JSON written by the path-planning tool. The
//! schema follows that tool's output:
//!
//! ```json
//! {
//!   "waypoints": [
//!     {
//!       "anchorPoint": {"x": 0.0, "y": 0.0},
//!       "prevControl": null,
//!       "nextControl": {"x": 0.5, "y": 0.0},
//!       "isStopPoint": false,
//!       "isReversal": false,
//!       "velOverride": null,
//!       "stopEvent": null
//!     }
//!   ],
//!   "isReversed": false,
//!   "maxVelocity": 0.8,
//!   "maxAcceleration": 1.0,
//!   "markers": [{"position": 0.5, "commands": [{"type": "log", "message": "halfway"}]}]
//! }
//! ```
//!
//! Everything is validated on load so that a bad path is rejected before the
//! robot moves.

use std::fs;
use std::path::Path as FsPath;
use std::time::Duration;

use nalgebra::Vector2;
use serde::Deserialize;
use tracing::info;

use crate::bezier::CubicBezier;
use crate::command::Command;
use crate::error::NavigationError;
use crate::events::{ExecutionMode, StopEvent, WaitPolicy};
use crate::spline::{Spline, SplineLocation};

/// Anchor of the path with its two Bézier handles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub anchor: Vector2<f64>,
    /// Handle shaping the segment that ends here. Unused on the first point.
    pub incoming: Option<Vector2<f64>>,
    /// Handle shaping the segment that starts here. Unused on the last point.
    pub outgoing: Option<Vector2<f64>>,
}

impl ControlPoint {
    pub fn new(anchor: Vector2<f64>, incoming: Option<Vector2<f64>>, outgoing: Option<Vector2<f64>>) -> Self {
        Self {
            anchor,
            incoming,
            outgoing,
        }
    }
}

/// What the profiler must do at a control point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MotionEvent {
    /// Pass through at whatever speed the limits allow.
    #[default]
    Regular,
    /// Come to rest.
    StopPoint,
    /// Come to rest and continue driving the other way.
    Reversal,
    /// Pass through at this speed (m/s). On the first point, start at it.
    VelocityOverride(f64),
}

impl MotionEvent {
    /// Whether the robot is at rest at this point.
    pub fn is_stop(&self) -> bool {
        matches!(self, MotionEvent::StopPoint | MotionEvent::Reversal)
    }
}

/// A control point with its motion event and optional stop event.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPoint {
    pub control: ControlPoint,
    pub event: MotionEvent,
    pub stop_event: Option<StopEvent>,
}

impl PathPoint {
    pub fn new(control: ControlPoint, event: MotionEvent) -> Self {
        Self {
            control,
            event,
            stop_event: None,
        }
    }

    pub fn with_stop_event(mut self, stop_event: StopEvent) -> Self {
        self.stop_event = Some(stop_event);
        self
    }
}

/// Commands anchored to a location on the path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMarker {
    pub location: SplineLocation,
    pub commands: Vec<Command>,
}

/// Optional per-path speed limits, applied on top of the robot's own.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathLimits {
    pub max_velocity: Option<f64>,
    pub max_acceleration: Option<f64>,
}

/// A validated path.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    points: Vec<PathPoint>,
    markers: Vec<PathMarker>,
    reversed: bool,
    limits: PathLimits,
    spline: Spline,
}

impl Path {
    /// Build and validate a path.
    ///
    /// # Errors
    ///
    /// Returns [`NavigationError::Configuration`] when:
    /// - there are fewer than two points or a required handle is missing
    /// - a segment has a stationary point (its curvature is undefined)
    /// - a velocity override is not a positive finite speed, or sits on the
    ///   last point
    /// - a reversal is on the first or last point
    /// - a stop event is on a point the robot does not stop at
    /// - a marker lies outside the path or a command has bad arguments
    pub fn new(
        points: Vec<PathPoint>,
        markers: Vec<PathMarker>,
        reversed: bool,
        arc_step: f64,
    ) -> Result<Self, NavigationError> {
        if points.len() < 2 {
            return Err(config_error(format!("a path needs at least 2 points, got {}", points.len())));
        }
        let last = points.len() - 1;

        let mut segments = Vec::with_capacity(last);
        for (i, pair) in points.windows(2).enumerate() {
            let start = &pair[0].control;
            let end = &pair[1].control;
            let outgoing = start
                .outgoing
                .ok_or_else(|| config_error(format!("point {i} has no outgoing control")))?;
            let incoming = end
                .incoming
                .ok_or_else(|| config_error(format!("point {} has no incoming control", i + 1)))?;
            let segment = CubicBezier::new(start.anchor, outgoing, incoming, end.anchor);
            if segment.control_points().iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                return Err(config_error(format!("segment {i} has a non-finite coordinate")));
            }
            if segment.has_stationary_point() {
                return Err(config_error(format!(
                    "segment {i} has a zero-speed point; move its control points off the anchors"
                )));
            }
            segments.push(segment);
        }

        for (i, point) in points.iter().enumerate() {
            match point.event {
                MotionEvent::VelocityOverride(speed) if !(speed.is_finite() && speed > 0.0) => {
                    return Err(config_error(format!("point {i} has velocity override {speed}")));
                }
                MotionEvent::VelocityOverride(_) if i == last => {
                    return Err(config_error("the last point cannot carry a velocity override".into()));
                }
                MotionEvent::Reversal if i == 0 || i == last => {
                    return Err(config_error(format!("reversal on point {i} must be on an interior point")));
                }
                _ => {}
            }
            if let Some(stop_event) = &point.stop_event {
                if i == 0 || !(point.event.is_stop() || i == last) {
                    return Err(config_error(format!(
                        "point {i} has a stop event but the robot does not stop there"
                    )));
                }
                for command in &stop_event.commands {
                    command
                        .validate()
                        .map_err(|e| config_error(format!("stop event on point {i}: {e}")))?;
                }
            }
        }

        for (i, marker) in markers.iter().enumerate() {
            if marker.location.segment >= segments.len() || !(0.0..=1.0).contains(&marker.location.t) {
                return Err(config_error(format!("marker {i} lies outside the path")));
            }
            for command in &marker.commands {
                command
                    .validate()
                    .map_err(|e| config_error(format!("marker {i}: {e}")))?;
            }
        }

        Ok(Self {
            points,
            markers,
            reversed,
            limits: PathLimits::default(),
            spline: Spline::new(segments, arc_step)?,
        })
    }

    /// Attach per-path speed limits.
    pub fn with_limits(mut self, limits: PathLimits) -> Result<Self, NavigationError> {
        for (name, limit) in [("max velocity", limits.max_velocity), ("max acceleration", limits.max_acceleration)] {
            if let Some(value) = limit {
                if !(value.is_finite() && value > 0.0) {
                    return Err(config_error(format!("path {name} {value} must be finite and positive")));
                }
            }
        }
        self.limits = limits;
        Ok(self)
    }

    /// Parse and validate a path from the path tool's JSON.
    pub fn from_json(json: &str, arc_step: f64) -> Result<Self, NavigationError> {
        let file: PathFile = serde_json::from_str(json)?;
        file.into_path(arc_step)
    }

    /// Read, parse and validate a path file.
    pub fn load(file: impl AsRef<FsPath>, arc_step: f64) -> Result<Self, NavigationError> {
        let file = file.as_ref();
        let path = Self::from_json(&fs::read_to_string(file)?, arc_step)?;
        info!(
            file = %file.display(),
            points = path.points.len(),
            markers = path.markers.len(),
            length = path.spline.total_length(),
            "Path loaded"
        );
        Ok(path)
    }

    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    pub fn markers(&self) -> &[PathMarker] {
        &self.markers
    }

    /// Whether the path starts out driving backwards.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn limits(&self) -> PathLimits {
        self.limits
    }

    pub fn spline(&self) -> &Spline {
        &self.spline
    }

    /// Location of control point `index` on the spline.
    ///
    /// Interior points are reported as the end of the segment arriving at
    /// them, so that headings there are those of the incoming segment.
    pub fn point_location(&self, index: usize) -> SplineLocation {
        match index {
            0 => SplineLocation::START,
            i => SplineLocation::new(i - 1, 1.0),
        }
    }
}

fn config_error(message: String) -> NavigationError {
    NavigationError::Configuration(message)
}

#[derive(Debug, Deserialize)]
struct Xy {
    x: f64,
    y: f64,
}

impl From<Xy> for Vector2<f64> {
    fn from(p: Xy) -> Self {
        Vector2::new(p.x, p.y)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathFile {
    waypoints: Vec<PointFile>,
    #[serde(default)]
    is_reversed: bool,
    #[serde(default)]
    max_velocity: Option<f64>,
    #[serde(default)]
    max_acceleration: Option<f64>,
    #[serde(default)]
    markers: Vec<MarkerFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointFile {
    anchor_point: Xy,
    #[serde(default)]
    prev_control: Option<Xy>,
    #[serde(default)]
    next_control: Option<Xy>,
    #[serde(default)]
    is_stop_point: bool,
    #[serde(default)]
    is_reversal: bool,
    #[serde(default)]
    vel_override: Option<f64>,
    #[serde(default)]
    stop_event: Option<StopEventFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WaitBehavior {
    #[default]
    None,
    Before,
    After,
    Minimum,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopEventFile {
    #[serde(default)]
    commands: Vec<Command>,
    #[serde(default)]
    execution_behavior: ExecutionMode,
    #[serde(default)]
    wait_behavior: WaitBehavior,
    #[serde(default)]
    wait_time: f64,
}

#[derive(Debug, Deserialize)]
struct MarkerFile {
    /// Spline parameter `segment + t`.
    position: f64,
    #[serde(default)]
    commands: Vec<Command>,
}

impl StopEventFile {
    fn into_stop_event(self, index: usize) -> Result<StopEvent, NavigationError> {
        if !(self.wait_time.is_finite() && self.wait_time >= 0.0) {
            return Err(config_error(format!(
                "stop event on point {index} has wait time {}",
                self.wait_time
            )));
        }
        let time = Duration::from_secs_f64(self.wait_time);
        let wait = match self.wait_behavior {
            WaitBehavior::None => WaitPolicy::default(),
            WaitBehavior::Before => WaitPolicy {
                before: time,
                ..WaitPolicy::default()
            },
            WaitBehavior::After => WaitPolicy {
                after: time,
                ..WaitPolicy::default()
            },
            WaitBehavior::Minimum => WaitPolicy {
                min_duration: time,
                ..WaitPolicy::default()
            },
        };
        Ok(StopEvent {
            commands: self.commands,
            mode: self.execution_behavior,
            wait,
        })
    }
}

impl PathFile {
    fn into_path(self, arc_step: f64) -> Result<Path, NavigationError> {
        let segment_count = self.waypoints.len().saturating_sub(1);
        let mut points = Vec::with_capacity(self.waypoints.len());
        for (i, point) in self.waypoints.into_iter().enumerate() {
            let event = match (point.is_stop_point, point.is_reversal, point.vel_override) {
                (false, false, None) => MotionEvent::Regular,
                (true, false, None) => MotionEvent::StopPoint,
                (false, true, None) => MotionEvent::Reversal,
                (false, false, Some(speed)) => MotionEvent::VelocityOverride(speed),
                _ => {
                    return Err(config_error(format!("point {i} has conflicting motion events")));
                }
            };
            let stop_event = point.stop_event.map(|e| e.into_stop_event(i)).transpose()?;
            points.push(PathPoint {
                control: ControlPoint::new(
                    point.anchor_point.into(),
                    point.prev_control.map(Into::into),
                    point.next_control.map(Into::into),
                ),
                event,
                stop_event,
            });
        }

        let mut markers = Vec::with_capacity(self.markers.len());
        for (i, marker) in self.markers.into_iter().enumerate() {
            if !(marker.position.is_finite() && (0.0..=segment_count as f64).contains(&marker.position)) {
                return Err(config_error(format!(
                    "marker {i} at position {} lies outside the path",
                    marker.position
                )));
            }
            markers.push(PathMarker {
                location: SplineLocation::from_parameter(marker.position, segment_count),
                commands: marker.commands,
            });
        }

        Path::new(points, markers, self.is_reversed, arc_step)?.with_limits(PathLimits {
            max_velocity: self.max_velocity,
            max_acceleration: self.max_acceleration,
        })
    }
}
