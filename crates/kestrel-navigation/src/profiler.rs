//! Time-stepped velocity profiling.
//!
//! Before stepping, the profiler samples the curvature of every segment and
//! builds a speed envelope over arc length. The envelope holds the curvature
//! ceiling `sqrt(A / |κ|)`, the outer-wheel speed limit, a limit on how fast
//! the wheels must diverge where curvature changes, and the target speed of
//! every stop point, reversal, override and the path end. A backward pass
//! then lowers each sample so the next one is reachable when braking, so
//! every ceiling ahead is met without exceeding the acceleration limit.
//!
//! The profiler then walks the spline one fixed timestep at a time, taking
//! the fastest speed for which the position after the step is still under the
//! envelope. Distance travelled in a step is the trapezoid `(v + v') / 2 · dt`,
//! so stops land on their control point at exactly zero speed.
//!
//! Where curvature jumps at a joint between segments, the angular velocity of
//! the waypoints follows the new curvature at the rate the wheels allow
//! rather than in one step.

use kestrel_kinematics::{ChassisSpeeds, Pose, RobotKinematics, WheelSpeeds};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::NavigationError;
use crate::path::{MotionEvent, Path, PathLimits};
use crate::spline::{Spline, SplineLocation};
use crate::trajectory::{StopMark, Trajectory, Waypoint};

/// A step ending within this distance (m) of an event lands on it.
const LANDING_TOLERANCE: f64 = 1e-6;

/// Share of the wheel acceleration limit a change of curvature may use at
/// the envelope speed: `v² · |dκ/ds| · track/2 ≤ TURN_SHARE · A`.
const TURN_SHARE: f64 = 0.4;

/// Headroom on the wheel acceleration kept for a change of curvature
/// between samples that the samples miss.
const TURN_MARGIN: f64 = 1.25;

/// Curvature jumps (1/m) at a joint below this are treated as continuous.
const CURVATURE_JUMP: f64 = 1e-6;

/// Halvings used to find the fastest speed that stays under the envelope.
const BISECTION_STEPS: usize = 60;

/// Profiler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Time between waypoints (s).
    pub timestep: f64,
    /// Curvature samples per segment for the speed envelope.
    pub curvature_samples: usize,
    /// Give up after this many steps.
    pub max_steps: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            timestep: 0.01,
            curvature_samples: 100,
            max_steps: 1_000_000,
        }
    }
}

impl ProfilerConfig {
    fn validate(&self) -> Result<(), NavigationError> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(NavigationError::Profile(format!(
                "timestep {} must be finite and positive",
                self.timestep
            )));
        }
        if self.curvature_samples < 3 {
            return Err(NavigationError::Profile("at least 3 curvature samples per segment are needed".into()));
        }
        if self.max_steps == 0 {
            return Err(NavigationError::Profile("max steps must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    Stop,
    Reversal,
    PassThrough,
    End,
}

/// A speed the robot must have when it reaches control point `point`, at arc
/// length `s`.
#[derive(Debug, Clone, Copy)]
struct Constraint {
    s: f64,
    location: SplineLocation,
    target: f64,
    kind: ConstraintKind,
    point: usize,
}

/// Robot limits tightened by the path's own.
struct Limits<'a> {
    robot: &'a RobotKinematics,
    max_velocity: f64,
    max_acceleration: f64,
}

impl<'a> Limits<'a> {
    fn new(robot: &'a RobotKinematics, path: PathLimits) -> Self {
        Self {
            robot,
            max_velocity: path.max_velocity.map_or(robot.max_velocity(), |v| v.min(robot.max_velocity())),
            max_acceleration: path
                .max_acceleration
                .map_or(robot.max_acceleration(), |a| a.min(robot.max_acceleration())),
        }
    }

    /// Fastest centre speed at curvature `kappa`: within the turn limit
    /// `sqrt(A / |κ|)` and with the outer wheel within its top speed.
    fn ceiling(&self, kappa: f64) -> f64 {
        let k = kappa.abs();
        let turn = (self.max_acceleration / k).sqrt();
        let outer_wheel = self.robot.max_velocity() / (1.0 + k * self.robot.half_track());
        self.max_velocity.min(turn).min(outer_wheel)
    }

    /// Override speed actually reachable at curvature `kappa`.
    fn override_target(&self, speed: f64, kappa: f64, point: usize) -> f64 {
        let ceiling = self.ceiling(kappa);
        if speed > ceiling {
            warn!(point, requested = speed, clamped = ceiling, "Velocity override is not reachable, clamping");
            ceiling
        } else {
            speed
        }
    }
}

/// Produce a trajectory for `path` on `robot`.
///
/// # Errors
///
/// Returns [`NavigationError::Profile`] if the configuration is unusable or
/// the end of the path is not reached within `max_steps`.
pub fn profile(path: &Path, robot: &RobotKinematics, config: &ProfilerConfig) -> Result<Trajectory, NavigationError> {
    config.validate()?;
    let limits = Limits::new(robot, path.limits());
    let spline = path.spline();
    let dt = config.timestep;
    let accel = limits.max_acceleration;

    let events = motion_constraints(path, &limits);
    let envelope = SpeedEnvelope::build(spline, &limits, &events, config.curvature_samples, dt);
    debug!(events = events.len(), cells = envelope.cells.len(), "Speed envelope ready");

    let mut direction = if path.is_reversed() { -1.0 } else { 1.0 };
    let mut location = SplineLocation::START;
    let mut s = 0.0;
    let mut time = 0.0;
    let mut speed = match path.points()[0].event {
        MotionEvent::VelocityOverride(v) => limits.override_target(v, spline.curvature(location, 1.0), 0),
        _ => 0.0,
    }
    .min(envelope.bound(0.0));

    let mut builder = WaypointBuilder::new(spline, robot, dt, accel);
    builder.push(time, location, direction, speed, s);

    let mut event_index = 0;
    for _ in 0..config.max_steps {
        let event = events[event_index];
        let next = envelope.next_speed(s, speed, dt, accel, event.s);
        let travel = (speed + next) / 2.0 * dt;
        time += dt;

        let landed = travel >= event.s - s - LANDING_TOLERANCE;
        if landed {
            location = event.location;
            s = event.s;
            speed = next.min(event.target);
        } else {
            location = spline.advance_by_arc_length(location, travel);
            s += travel;
            speed = next;
        }
        builder.push(time, location, direction, speed, s);

        if !landed {
            continue;
        }
        match event.kind {
            ConstraintKind::PassThrough => {}
            ConstraintKind::Stop => builder.mark_stop(event.point),
            ConstraintKind::Reversal => {
                builder.mark_stop(event.point);
                direction = -direction;
                debug!(point = event.point, time, "Reversing");
            }
            ConstraintKind::End => {
                builder.mark_stop(event.point);
                let trajectory = builder.finish()?;
                info!(
                    waypoints = trajectory.len(),
                    duration = trajectory.duration(),
                    peak_velocity = trajectory.peak_velocity(),
                    length = s,
                    "Trajectory profiled"
                );
                return Ok(trajectory);
            }
        }
        event_index += 1;
    }

    Err(NavigationError::Profile(format!(
        "path end not reached within {} steps",
        config.max_steps
    )))
}

/// Stop points, reversals, overrides and the path end, in path order.
fn motion_constraints(path: &Path, limits: &Limits) -> Vec<Constraint> {
    let spline = path.spline();
    let last = path.points().len() - 1;
    let mut constraints = Vec::new();
    let mut s = 0.0;

    for (i, point) in path.points().iter().enumerate().skip(1) {
        s += spline.segments()[i - 1].length(spline.arc_step());
        let location = path.point_location(i);
        let (kind, target) = if i == last {
            (ConstraintKind::End, 0.0)
        } else {
            match point.event {
                MotionEvent::Regular => continue,
                MotionEvent::StopPoint => (ConstraintKind::Stop, 0.0),
                MotionEvent::Reversal => (ConstraintKind::Reversal, 0.0),
                MotionEvent::VelocityOverride(speed) => (
                    ConstraintKind::PassThrough,
                    limits.override_target(speed, spline.curvature(location, 1.0), i),
                ),
            }
        };
        constraints.push(Constraint {
            s,
            location,
            target,
            kind,
            point: i,
        });
    }
    constraints
}

/// Stretch of path between two curvature samples.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cell {
    start: f64,
    end: f64,
    /// Envelope speed at `start`.
    entry: f64,
    /// Envelope speed at `end`.
    exit: f64,
    /// Centre acceleration allowed inside the cell.
    accel: f64,
}

impl Cell {
    /// Highest speed at `s` from which `exit` is still reachable, and that
    /// is reachable from `entry`.
    fn bound(&self, s: f64) -> f64 {
        let rising = self.entry * self.entry + 2.0 * self.accel * (s - self.start);
        let falling = self.exit * self.exit + 2.0 * self.accel * (self.end - s);
        rising.min(falling).max(0.0).sqrt().min(self.entry.max(self.exit))
    }
}

/// Speed limit over arc length, ordered by `s`.
#[derive(Debug, Clone, Default)]
struct SpeedEnvelope {
    cells: Vec<Cell>,
}

impl SpeedEnvelope {
    fn build(spline: &Spline, limits: &Limits, events: &[Constraint], samples: usize, dt: f64) -> Self {
        let half_track = limits.robot.half_track();
        let accel = limits.max_acceleration;
        let step = spline.arc_step();

        // samples of every segment, t = 0 and t = 1 included; joints appear twice
        let mut s: Vec<f64> = Vec::with_capacity(spline.segment_count() * samples);
        let mut kappa: Vec<f64> = Vec::with_capacity(spline.segment_count() * samples);
        let mut ceiling: Vec<f64> = Vec::with_capacity(spline.segment_count() * samples);
        let mut base = 0.0;
        for segment in spline.segments() {
            let length = segment.length(step);
            for j in 0..samples {
                let t = j as f64 / (samples - 1) as f64;
                let along = if j + 1 == samples {
                    length
                } else {
                    segment.length_between(0.0, t, step)
                };
                let floor = s.last().copied().unwrap_or(0.0);
                s.push((base + along).max(floor));
                kappa.push(segment.curvature(t));

                // the curvature can peak between two samples
                let mut limit = limits.ceiling(segment.curvature(t));
                if j > 0 {
                    let middle = (j as f64 - 0.5) / (samples - 1) as f64;
                    let between = limits.ceiling(segment.curvature(middle));
                    limit = limit.min(between);
                    if let Some(previous) = ceiling.last_mut() {
                        *previous = between.min(*previous);
                    }
                }
                ceiling.push(limit);
            }
            base += length;
        }
        let n = s.len();

        // keep v² · |dκ/ds| · track/2 within a share of the wheel budget
        let rate: Vec<f64> = (0..n - 1)
            .map(|i| {
                let ds = s[i + 1] - s[i];
                if ds > 0.0 { (kappa[i + 1] - kappa[i]).abs() / ds } else { 0.0 }
            })
            .collect();
        for (i, &r) in rate.iter().enumerate() {
            if r > 0.0 {
                let cap = (TURN_SHARE * accel / (half_track * r)).sqrt();
                ceiling[i] = ceiling[i].min(cap);
                ceiling[i + 1] = ceiling[i + 1].min(cap);
            }
        }

        // what is left of the wheel budget once the turn has its share
        let mut cell_accel: Vec<f64> = (0..n - 1)
            .map(|i| {
                let speed = ceiling[i].max(ceiling[i + 1]);
                let turning = TURN_MARGIN * half_track * rate[i] * speed * speed;
                let k = kappa[i].abs().max(kappa[i + 1].abs());
                (accel - turning) / (1.0 + half_track * k)
            })
            .collect();

        // past a curvature jump, hold the joint speed until the wheels have
        // had time to diverge to the new curvature
        for i in 0..n - 1 {
            let jump = (kappa[i + 1] - kappa[i]).abs();
            if s[i + 1] > s[i] || jump < CURVATURE_JUMP {
                continue;
            }
            let joint = ceiling[i].min(ceiling[i + 1]);
            let zone = 1.5 * 2.0 * half_track * joint * joint * jump / accel + joint * dt;
            let k_joint = kappa[i].abs().max(kappa[i + 1].abs());
            for k in i + 1..n - 1 {
                if s[k] > s[i] + zone {
                    break;
                }
                ceiling[k] = ceiling[k].min(joint);
                let k_cell = k_joint.max(kappa[k].abs()).max(kappa[k + 1].abs());
                cell_accel[k] = cell_accel[k].min(accel / (2.0 * (1.0 + half_track * k_cell)));
            }
        }

        for event in events {
            let end = event.point * samples - 1;
            ceiling[end] = ceiling[end].min(event.target);
            if end + 1 < n {
                ceiling[end + 1] = ceiling[end + 1].min(event.target);
            }
        }
        if let Some(last) = ceiling.last_mut() {
            *last = 0.0;
        }

        // brake early enough for every sample ahead
        for i in (0..n - 1).rev() {
            let ds = s[i + 1] - s[i];
            let reach = (ceiling[i + 1] * ceiling[i + 1] + 2.0 * cell_accel[i] * ds).sqrt();
            ceiling[i] = ceiling[i].min(reach);
        }
        for i in 0..n - 1 {
            if s[i + 1] <= s[i] {
                ceiling[i + 1] = ceiling[i + 1].min(ceiling[i]);
            }
        }

        let cells = (0..n - 1)
            .filter(|&i| s[i + 1] > s[i])
            .map(|i| Cell {
                start: s[i],
                end: s[i + 1],
                entry: ceiling[i],
                exit: ceiling[i + 1],
                accel: cell_accel[i],
            })
            .collect();
        Self { cells }
    }

    fn cell(&self, s: f64) -> Option<&Cell> {
        let i = self.cells.partition_point(|c| c.end < s);
        self.cells.get(i)
    }

    /// Envelope speed at arc length `s`. Zero past the end of the path.
    fn bound(&self, s: f64) -> f64 {
        self.cell(s).map_or(0.0, |c| c.bound(s))
    }

    /// Fastest speed after one step from `v` at `s` that stays under the
    /// envelope, never looking past `horizon`. Never slows by more than
    /// `decel · dt`.
    fn next_speed(&self, s: f64, v: f64, dt: f64, decel: f64, horizon: f64) -> f64 {
        let up = self.cell(s).map_or(decel, |c| c.accel);
        let mut low = (v - decel * dt).max(0.0);
        let mut high = (v + up * dt).max(low);
        let fits = |w: f64| w <= self.bound((s + (v + w) / 2.0 * dt).min(horizon));

        if fits(high) {
            return high;
        }
        if !fits(low) {
            return low;
        }
        for _ in 0..BISECTION_STEPS {
            let middle = (low + high) / 2.0;
            if fits(middle) {
                low = middle;
            } else {
                high = middle;
            }
        }
        low
    }
}

/// Turns profiled speeds into waypoints.
struct WaypointBuilder<'a> {
    spline: &'a Spline,
    robot: &'a RobotKinematics,
    dt: f64,
    max_acceleration: f64,
    waypoints: Vec<Waypoint>,
    stops: Vec<StopMark>,
    previous: Option<WheelSpeeds>,
}

impl<'a> WaypointBuilder<'a> {
    fn new(spline: &'a Spline, robot: &'a RobotKinematics, dt: f64, max_acceleration: f64) -> Self {
        Self {
            spline,
            robot,
            dt,
            max_acceleration,
            waypoints: Vec::new(),
            stops: Vec::new(),
            previous: None,
        }
    }

    fn push(&mut self, time: f64, location: SplineLocation, direction: f64, speed: f64, distance: f64) {
        let kappa = self.spline.curvature(location, direction);
        let velocity = direction * speed;
        let omega = match self.previous {
            Some(previous) => self.limit_turn_rate(velocity, kappa * velocity, previous),
            None => kappa * velocity,
        };
        let wheels = self.robot.inverse_kinematics(ChassisSpeeds::new(velocity, omega));
        let (left_accel, right_accel) = match self.previous {
            Some(previous) => (
                (wheels.left - previous.left) / self.dt,
                (wheels.right - previous.right) / self.dt,
            ),
            None => (0.0, 0.0),
        };
        self.previous = Some(wheels);

        let position = self.spline.position(location);
        self.waypoints.push(Waypoint {
            time,
            x: position.x,
            y: position.y,
            heading: Pose::normalize_angle(self.spline.heading(location, direction)),
            velocity,
            angular_velocity: omega,
            left_accel,
            right_accel,
            distance,
        });
    }

    /// The angular velocity closest to `omega` that keeps both wheels within
    /// the acceleration limit of their `previous` speeds at centre speed
    /// `velocity`.
    fn limit_turn_rate(&self, velocity: f64, omega: f64, previous: WheelSpeeds) -> f64 {
        let half_track = self.robot.half_track();
        let step = self.max_acceleration * self.dt;
        // lever = ω · track/2; left = v - lever, right = v + lever
        let low = (velocity - previous.left - step).max(previous.right - velocity - step);
        let high = (velocity - previous.left + step).min(previous.right - velocity + step);
        let lever = if low <= high {
            (omega * half_track).clamp(low, high)
        } else {
            (low + high) / 2.0
        };
        lever / half_track
    }

    /// Mark the latest waypoint as a stop on control point `point`.
    fn mark_stop(&mut self, point: usize) {
        self.stops.push(StopMark {
            waypoint: self.waypoints.len() - 1,
            point,
        });
    }

    fn finish(mut self) -> Result<Trajectory, NavigationError> {
        // the first waypoint has no predecessor; use the forward difference
        if self.waypoints.len() >= 2 {
            self.waypoints[0].left_accel = self.waypoints[1].left_accel;
            self.waypoints[0].right_accel = self.waypoints[1].right_accel;
        }
        Trajectory::new(self.waypoints, self.stops)
    }
}
