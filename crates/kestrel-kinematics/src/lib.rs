#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library for 2D differential-drive robot kinematics."]
#![doc = ""]
#![doc = "This crate provides structures and functions for calculating robot pose,"]
#![doc = "converting between chassis and wheel speeds, saturating wheel demands without"]
#![doc = "distorting the commanded turn rate, and tracking a reference trajectory with"]
#![doc = "a RAMSETE controller."]
#![doc = ""]
#![doc = "Conventions: metres, seconds and radians throughout. Headings are measured"]
#![doc = "counter-clockwise from the world x-axis and wrapped to `(-PI, PI]`. Wheel"]
#![doc = "speeds are linear surface speeds (m/s), not shaft rates."]

use core::f64::consts::{PI, TAU};
use core::fmt;
use libm::{cos, fabs, fmax, sin};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub mod ramsete;

pub use error::KinematicsError;
pub use ramsete::{Ramsete, TrackingError};

/// A 2‑D pose `(x, y, θ)` in meters and radians (θ measured counter‑clockwise
/// from the x‑axis in the world frame).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// World‑frame x position (m).
    pub x: f64,
    /// World‑frame y position (m).
    pub y: f64,
    /// Heading (rad), normalized to `(-PI, PI]`.
    pub theta: f64,
}

impl Pose {
    /// Construct a new pose.
    ///
    /// # Arguments
    ///
    /// * `x`: World-frame x position in meters.
    /// * `y`: World-frame y position in meters.
    /// * `theta`: Heading in radians.
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }

    /// Normalize an angle to be within `(-PI, PI]`.
    ///
    /// Angles at `-PI` will be normalized to `PI`.
    ///
    /// # Arguments
    ///
    /// * `angle`: The angle in radians to normalize.
    ///
    /// # Returns
    ///
    /// The normalized angle in radians.
    pub fn normalize_angle(angle: f64) -> f64 {
        let a = angle % TAU;
        if a > PI {
            a - TAU
        } else if a <= -PI {
            a + TAU
        } else {
            a
        }
    }

    /// Euclidean distance between the positions of two poses.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        libm::hypot(other.x - self.x, other.y - self.y)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x: {:.3}, y: {:.3}, θ: {:.3} rad)", self.x, self.y, self.theta)
    }
}

/// Linear and angular chassis velocities.
/// These represent the overall motion of the robot's chassis.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisSpeeds {
    /// Linear speed of the chassis center (m/s). Negative while driving backwards.
    pub v: f64,
    /// Angular speed of the chassis (rad/s), counter-clockwise positive.
    pub omega: f64,
}

impl ChassisSpeeds {
    /// Construct chassis speeds.
    ///
    /// # Arguments
    ///
    /// * `v`: Linear speed of the chassis center (m/s).
    /// * `omega`: Angular speed of the chassis (rad/s).
    pub const fn new(v: f64, omega: f64) -> Self {
        ChassisSpeeds { v, omega }
    }
}

impl fmt::Display for ChassisSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(v: {:.3} m/s, ω: {:.3} rad/s)", self.v, self.omega)
    }
}

/// Left and right wheel surface speeds.
///
/// The same pair is also used for per-wheel accelerations (m/s²) by the
/// velocity profiler.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelSpeeds {
    /// Left wheel surface speed (m/s).
    pub left: f64,
    /// Right wheel surface speed (m/s).
    pub right: f64,
}

impl WheelSpeeds {
    /// Construct wheel speeds.
    ///
    /// # Arguments
    ///
    /// * `left`: Left wheel surface speed (m/s).
    /// * `right`: Right wheel surface speed (m/s).
    pub const fn new(left: f64, right: f64) -> Self {
        WheelSpeeds { left, right }
    }

    /// Largest absolute wheel speed of the pair.
    pub fn peak(&self) -> f64 {
        fmax(fabs(self.left), fabs(self.right))
    }
}

impl fmt::Display for WheelSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(L: {:.3} m/s, R: {:.3} m/s)", self.left, self.right)
    }
}

/// Physical description and drive limits of a differential-drive robot.
///
/// Immutable for the duration of a run. Provides the forward and inverse
/// kinematics and the ratio-preserving wheel saturation used by both the
/// velocity profiler and the tracking controller.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotKinematics {
    /// Distance between the two drive wheels' contact points (m).
    track_width: f64,
    /// Wheel circumference (m).
    wheel_circumference: f64,
    /// Maximum wheel surface speed (m/s).
    max_velocity: f64,
    /// Maximum wheel surface acceleration (m/s²).
    max_acceleration: f64,
}

impl RobotKinematics {
    /// Construct a new robot description.
    ///
    /// # Arguments
    ///
    /// * `track_width`: The distance between the drive wheels in meters.
    /// * `wheel_circumference`: The circumference of the drive wheels in meters.
    /// * `max_velocity`: The maximum speed of either wheel in m/s.
    /// * `max_acceleration`: The maximum acceleration of either wheel in m/s².
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::InvalidTrackWidth)` if `track_width` is not positive.
    /// Returns `Err(KinematicsError::InvalidWheelCircumference)` if `wheel_circumference` is not positive.
    /// Returns `Err(KinematicsError::InvalidLimit)` if either limit is not finite and positive.
    pub fn new(
        track_width: f64,
        wheel_circumference: f64,
        max_velocity: f64,
        max_acceleration: f64,
    ) -> Result<Self, KinematicsError> {
        if !(track_width > 0.0) || !track_width.is_finite() {
            return Err(KinematicsError::InvalidTrackWidth("must be positive"));
        }
        if !(wheel_circumference > 0.0) || !wheel_circumference.is_finite() {
            return Err(KinematicsError::InvalidWheelCircumference(
                "must be positive",
            ));
        }
        if !(max_velocity > 0.0) || !max_velocity.is_finite() {
            return Err(KinematicsError::InvalidLimit(
                "max velocity must be finite and positive",
            ));
        }
        if !(max_acceleration > 0.0) || !max_acceleration.is_finite() {
            return Err(KinematicsError::InvalidLimit(
                "max acceleration must be finite and positive",
            ));
        }
        Ok(RobotKinematics {
            track_width,
            wheel_circumference,
            max_velocity,
            max_acceleration,
        })
    }

    /// Returns the track width.
    pub fn track_width(&self) -> f64 {
        self.track_width
    }

    /// Returns half of the track width, the lever arm of each wheel.
    pub fn half_track(&self) -> f64 {
        self.track_width / 2.0
    }

    /// Returns the wheel circumference.
    pub fn wheel_circumference(&self) -> f64 {
        self.wheel_circumference
    }

    /// Returns the maximum wheel speed.
    pub fn max_velocity(&self) -> f64 {
        self.max_velocity
    }

    /// Returns the maximum wheel acceleration.
    pub fn max_acceleration(&self) -> f64 {
        self.max_acceleration
    }

    /// Converts a signed number of wheel revolutions into travelled distance.
    pub fn rotations_to_distance(&self, revolutions: f64) -> f64 {
        revolutions * self.wheel_circumference
    }

    /// Calculates the robot's chassis speeds (linear and angular velocity)
    /// from the wheel speeds. This is the forward kinematics problem.
    ///
    /// # Arguments
    ///
    /// * `wheel_speeds`: The measured or commanded surface speeds of the left and right wheels.
    ///
    /// # Returns
    ///
    /// The resulting linear and angular velocities of the robot chassis.
    pub fn forward_kinematics(&self, wheel_speeds: WheelSpeeds) -> ChassisSpeeds {
        let v = (wheel_speeds.right + wheel_speeds.left) / 2.0;
        let omega = (wheel_speeds.right - wheel_speeds.left) / self.track_width;

        ChassisSpeeds::new(v, omega)
    }

    /// Calculates the required wheel speeds to achieve the given chassis speeds.
    /// This is the inverse kinematics problem. No saturation is applied.
    ///
    /// # Arguments
    ///
    /// * `chassis_speeds`: The desired linear and angular velocities of the robot chassis.
    ///
    /// # Returns
    ///
    /// The required surface speeds for the left and right wheels.
    pub fn inverse_kinematics(&self, chassis_speeds: ChassisSpeeds) -> WheelSpeeds {
        let lever = chassis_speeds.omega * self.half_track();
        WheelSpeeds::new(chassis_speeds.v - lever, chassis_speeds.v + lever)
    }

    /// Scales both wheels by the same factor so that neither exceeds the
    /// maximum wheel speed.
    ///
    /// The ratio between the wheels, and therefore the commanded curvature
    /// `ω / V`, is preserved. Wheel pairs already within the limit are
    /// returned unchanged.
    pub fn desaturate(&self, wheel_speeds: WheelSpeeds) -> WheelSpeeds {
        let peak = wheel_speeds.peak();
        if peak <= self.max_velocity {
            return wheel_speeds;
        }
        let scale = self.max_velocity / peak;
        WheelSpeeds::new(wheel_speeds.left * scale, wheel_speeds.right * scale)
    }

    /// Inverse kinematics followed by [`RobotKinematics::desaturate`].
    pub fn wheel_speeds(&self, chassis_speeds: ChassisSpeeds) -> WheelSpeeds {
        self.desaturate(self.inverse_kinematics(chassis_speeds))
    }

    /// Updates the robot's pose given its current pose, chassis speeds, and time delta.
    ///
    /// This method performs odometry, integrating the chassis speeds over the time delta `dt`
    /// to estimate the new pose. It assumes constant chassis speeds over the interval `dt`
    /// and integrates along the midpoint heading of the interval.
    /// The final heading is normalized to `(-PI, PI]`.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::NegativeTimeDelta)` if `dt` is negative.
    pub fn update_pose(
        &self,
        current_pose: Pose,
        chassis_speeds: ChassisSpeeds,
        dt: f64,
    ) -> Result<Pose, KinematicsError> {
        if dt < 0.0 {
            return Err(KinematicsError::NegativeTimeDelta(
                "must be non-negative",
            ));
        }

        let delta_theta = chassis_speeds.omega * dt;
        let new_theta = current_pose.theta + delta_theta;
        Ok(Self::integrate_displacement(
            current_pose,
            chassis_speeds.v * dt,
            new_theta,
        ))
    }

    /// Convenience function to update pose directly from wheel speeds and dt.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::NegativeTimeDelta)` if `dt` is negative (propagated from `update_pose`).
    pub fn update_pose_from_wheel_speeds(
        &self,
        current_pose: Pose,
        wheel_speeds: WheelSpeeds,
        dt: f64,
    ) -> Result<Pose, KinematicsError> {
        let chassis_speeds = self.forward_kinematics(wheel_speeds);
        self.update_pose(current_pose, chassis_speeds, dt)
    }

    /// Advances `current_pose` by a travelled `distance` while the heading
    /// moves to `new_theta`.
    ///
    /// The displacement is applied along the midpoint heading of the step,
    /// which is exact for constant-curvature motion to second order.
    pub fn integrate_displacement(current_pose: Pose, distance: f64, new_theta: f64) -> Pose {
        let delta_theta = Pose::normalize_angle(new_theta - current_pose.theta);
        let mid_theta = current_pose.theta + delta_theta / 2.0;
        Pose {
            x: current_pose.x + distance * cos(mid_theta),
            y: current_pose.y + distance * sin(mid_theta),
            theta: Pose::normalize_angle(current_pose.theta + delta_theta),
        }
    }
}

impl fmt::Display for RobotKinematics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RobotKinematics (track: {:.3} m, wheel: {:.3} m, vmax: {:.2} m/s, amax: {:.2} m/s²)",
            self.track_width, self.wheel_circumference, self.max_velocity, self.max_acceleration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    const EPSILON: f64 = 1e-6;

    fn robot() -> RobotKinematics {
        // track 0.5 m, wheel circumference 0.2 m, 1 m/s, 2 m/s²
        RobotKinematics::new(0.5, 0.2, 1.0, 2.0).unwrap()
    }

    #[test]
    fn test_pose_normalization() {
        assert!((Pose::normalize_angle(0.0) - 0.0).abs() < EPSILON);
        assert!((Pose::normalize_angle(PI) - PI).abs() < EPSILON); // PI stays PI in (-PI, PI]
        assert!((Pose::normalize_angle(-PI) - PI).abs() < EPSILON); // -PI maps to PI
        assert!((Pose::normalize_angle(-PI + EPSILON) - (-PI + EPSILON)).abs() < EPSILON);
        assert!((Pose::normalize_angle(3.0 * PI) - PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(2.5 * PI) - 0.5 * PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-2.5 * PI) - -0.5 * PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-3.0 * PI) - PI).abs() < EPSILON);
    }

    #[test]
    fn test_kinematics_constructor() {
        let kinematics = robot();
        assert_eq!(kinematics.track_width(), 0.5);
        assert_eq!(kinematics.half_track(), 0.25);
        assert_eq!(kinematics.wheel_circumference(), 0.2);
        assert_eq!(kinematics.max_velocity(), 1.0);
        assert_eq!(kinematics.max_acceleration(), 2.0);
    }

    #[test]
    fn test_constructor_invalid_track_width() {
        let result = RobotKinematics::new(0.0, 0.2, 1.0, 1.0);
        assert!(matches!(result, Err(KinematicsError::InvalidTrackWidth("must be positive"))));
        let result_negative = RobotKinematics::new(-0.5, 0.2, 1.0, 1.0);
        assert!(matches!(result_negative, Err(KinematicsError::InvalidTrackWidth(_))));
    }

    #[test]
    fn test_constructor_invalid_circumference_and_limits() {
        assert!(matches!(
            RobotKinematics::new(0.5, 0.0, 1.0, 1.0),
            Err(KinematicsError::InvalidWheelCircumference(_))
        ));
        assert!(matches!(
            RobotKinematics::new(0.5, 0.2, f64::NAN, 1.0),
            Err(KinematicsError::InvalidLimit(_))
        ));
        assert!(matches!(
            RobotKinematics::new(0.5, 0.2, 1.0, 0.0),
            Err(KinematicsError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_forward_kinematics_pivot_turn() {
        let kinematics = robot();
        let chassis_speeds = kinematics.forward_kinematics(WheelSpeeds::new(-0.5, 0.5));
        // omega = (0.5 - (-0.5)) / 0.5 = 2 rad/s
        assert!((chassis_speeds.v - 0.0).abs() < EPSILON);
        assert!((chassis_speeds.omega - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_inverse_kinematics_gentle_turn() {
        let kinematics = robot();
        // v_r = 0.75 + 1.0 * 0.25 = 1.0, v_l = 0.75 - 0.25 = 0.5
        let wheel_speeds = kinematics.inverse_kinematics(ChassisSpeeds::new(0.75, 1.0));
        assert!((wheel_speeds.left - 0.5).abs() < EPSILON);
        assert!((wheel_speeds.right - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_round_trip_is_exact_without_clamping() {
        let kinematics = robot();
        for &(v, omega) in &[(0.3, 0.0), (0.2, 1.1), (-0.4, -0.7), (0.0, 1.5)] {
            let chassis = ChassisSpeeds::new(v, omega);
            let wheels = kinematics.wheel_speeds(chassis);
            let back = kinematics.forward_kinematics(wheels);
            assert!((back.v - v).abs() < 1e-12);
            assert!((back.omega - omega).abs() < 1e-12);
        }
    }

    #[test]
    fn test_desaturate_preserves_ratio() {
        let kinematics = robot();
        let demand = kinematics.inverse_kinematics(ChassisSpeeds::new(1.0, 2.0));
        // raw: left 0.5, right 1.5
        let clamped = kinematics.desaturate(demand);
        assert!((clamped.right - 1.0).abs() < EPSILON);
        assert!((clamped.left - 1.0 / 3.0).abs() < EPSILON);
        assert!((clamped.left / clamped.right - demand.left / demand.right).abs() < EPSILON);

        let back = kinematics.forward_kinematics(clamped);
        let original = ChassisSpeeds::new(1.0, 2.0);
        assert!((back.omega / back.v - original.omega / original.v).abs() < EPSILON);
    }

    #[test]
    fn test_desaturate_negative_wheel_dominates() {
        let kinematics = robot();
        let clamped = kinematics.desaturate(WheelSpeeds::new(-2.0, 1.0));
        assert!((clamped.left + 1.0).abs() < EPSILON);
        assert!((clamped.right - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_update_pose_straight_with_initial_rotation() {
        let kinematics = robot();
        let current_pose = Pose::new(1.0, 1.0, PI / 2.0);
        let new_pose = kinematics
            .update_pose(current_pose, ChassisSpeeds::new(1.0, 0.0), 2.0)
            .unwrap();
        assert!((new_pose.x - 1.0).abs() < EPSILON);
        assert!((new_pose.y - 3.0).abs() < EPSILON);
        assert!((new_pose.theta - PI / 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_update_pose_straight_negative_x_axis() {
        let kinematics = robot();
        let new_pose = kinematics
            .update_pose(Pose::new(0.0, 0.0, PI), ChassisSpeeds::new(1.0, 0.0), 1.0)
            .unwrap();
        assert!((new_pose.x - (-1.0)).abs() < EPSILON);
        assert!(new_pose.y.abs() < EPSILON);
        assert!((new_pose.theta - PI).abs() < EPSILON);
    }

    #[test]
    fn test_update_pose_pivot_turn_no_translation() {
        let kinematics = robot();
        let new_pose = kinematics
            .update_pose(Pose::default(), ChassisSpeeds::new(0.0, PI / 2.0), 1.0)
            .unwrap();
        assert!(new_pose.x.abs() < EPSILON);
        assert!(new_pose.y.abs() < EPSILON);
        assert!((new_pose.theta - PI / 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_update_pose_quarter_arc_uses_midpoint_heading() {
        let kinematics = robot();
        // 0.5 rad/s for 0.1 s at 1 m/s: chord direction is the midpoint heading
        let new_pose = kinematics
            .update_pose(Pose::default(), ChassisSpeeds::new(1.0, 0.5), 0.1)
            .unwrap();
        assert!((new_pose.x - 0.1 * (0.025_f64).cos()).abs() < EPSILON);
        assert!((new_pose.y - 0.1 * (0.025_f64).sin()).abs() < EPSILON);
        assert!((new_pose.theta - 0.05).abs() < EPSILON);
    }

    #[test]
    fn test_update_pose_negative_dt() {
        let kinematics = robot();
        let result = kinematics.update_pose(Pose::default(), ChassisSpeeds::new(1.0, 0.0), -0.1);
        assert!(matches!(result, Err(KinematicsError::NegativeTimeDelta("must be non-negative"))));
    }

    #[test]
    fn test_integrate_displacement_across_wrap() {
        // Heading crosses the PI seam: midpoint must be taken on the short arc.
        let start = Pose::new(0.0, 0.0, PI - 0.1);
        let end = RobotKinematics::integrate_displacement(start, 1.0, -PI + 0.1);
        assert!((end.x - (-1.0)).abs() < EPSILON);
        assert!(end.y.abs() < EPSILON);
        assert!((end.theta - (-PI + 0.1)).abs() < EPSILON);
    }

    #[test]
    fn test_rotation_conversions() {
        let kinematics = robot();
        assert!((kinematics.rotations_to_distance(2.5) - 0.5).abs() < EPSILON);
    }
}
