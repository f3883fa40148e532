//! RAMSETE nonlinear trajectory-tracking controller.
//!
//! Given the robot's estimated pose and a reference pose with its feed-forward
//! chassis speeds, the controller produces corrected chassis speeds that drive
//! the pose error to zero. The error is expressed in the robot frame:
//!
//! ```text
//! e_x =  cos θ · (x_ref - x) + sin θ · (y_ref - y)     forward error
//! e_y = -sin θ · (x_ref - x) + cos θ · (y_ref - y)     lateral error
//! e_θ = wrap(θ_ref - θ)                                heading error, (-PI, PI]
//!
//! k   = 2ζ · sqrt(ω_ref² + b · V_ref²)
//! v   = V_ref · cos e_θ + k · e_x
//! ω   = ω_ref + k · e_θ + b · V_ref · sinc(e_θ) · e_y
//! ```

use core::fmt;
use libm::{cos, sin, sqrt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{ChassisSpeeds, KinematicsError, Pose, RobotKinematics, WheelSpeeds};

/// Below this magnitude `sin(e) / e` is replaced by its limit, 1.
const SINC_EPSILON: f64 = 1e-9;

/// Pose error expressed in the robot's own frame.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingError {
    /// Error along the robot's heading (m). Positive when the reference is ahead.
    pub forward: f64,
    /// Error perpendicular to the heading (m). Positive when the reference is to the left.
    pub lateral: f64,
    /// Heading error (rad) wrapped to `(-PI, PI]`.
    pub heading: f64,
}

impl TrackingError {
    /// Computes the robot-frame error between `current` and `reference`.
    pub fn between(current: Pose, reference: Pose) -> Self {
        let dx = reference.x - current.x;
        let dy = reference.y - current.y;
        let (s, c) = (sin(current.theta), cos(current.theta));
        TrackingError {
            forward: c * dx + s * dy,
            lateral: -s * dx + c * dy,
            heading: Pose::normalize_angle(reference.theta - current.theta),
        }
    }
}

/// RAMSETE controller gains.
///
/// `b` (> 0) acts like a proportional term on position error, larger values
/// converge more aggressively. `zeta` (> 0) is a damping term.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramsete {
    b: f64,
    zeta: f64,
}

impl Ramsete {
    /// Construct a controller.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::InvalidGain)` if `b` or `zeta` is not finite and positive.
    pub fn new(b: f64, zeta: f64) -> Result<Self, KinematicsError> {
        if !(b > 0.0) || !b.is_finite() {
            return Err(KinematicsError::InvalidGain("b must be finite and positive"));
        }
        if !(zeta > 0.0) || !zeta.is_finite() {
            return Err(KinematicsError::InvalidGain(
                "zeta must be finite and positive",
            ));
        }
        Ok(Ramsete { b, zeta })
    }

    /// Returns the `b` gain.
    pub fn b(&self) -> f64 {
        self.b
    }

    /// Returns the `zeta` gain.
    pub fn zeta(&self) -> f64 {
        self.zeta
    }

    /// Computes corrected chassis speeds.
    ///
    /// # Arguments
    ///
    /// * `current`: The estimated robot pose.
    /// * `reference`: The pose the trajectory expects right now.
    /// * `reference_speeds`: The trajectory's feed-forward speeds at `reference`.
    pub fn calculate(
        &self,
        current: Pose,
        reference: Pose,
        reference_speeds: ChassisSpeeds,
    ) -> ChassisSpeeds {
        let error = TrackingError::between(current, reference);
        let v_ref = reference_speeds.v;
        let omega_ref = reference_speeds.omega;

        let k = 2.0 * self.zeta * sqrt(omega_ref * omega_ref + self.b * v_ref * v_ref);

        let v = v_ref * cos(error.heading) + k * error.forward;
        let omega = omega_ref
            + k * error.heading
            + self.b * v_ref * sinc(error.heading) * error.lateral;

        ChassisSpeeds::new(v, omega)
    }

    /// Computes corrected wheel speeds, saturated with
    /// [`RobotKinematics::desaturate`].
    pub fn wheel_speeds(
        &self,
        robot: &RobotKinematics,
        current: Pose,
        reference: Pose,
        reference_speeds: ChassisSpeeds,
    ) -> WheelSpeeds {
        robot.wheel_speeds(self.calculate(current, reference, reference_speeds))
    }
}

impl fmt::Display for Ramsete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ramsete (b: {:.3}, ζ: {:.3})", self.b, self.zeta)
    }
}

/// `sin(x) / x`, continuous at zero.
fn sinc(x: f64) -> f64 {
    if libm::fabs(x) < SINC_EPSILON {
        1.0
    } else {
        sin(x) / x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::{FRAC_PI_2, PI};

    const EPSILON: f64 = 1e-9;

    fn controller() -> Ramsete {
        Ramsete::new(2.0, 0.7).unwrap()
    }

    #[test]
    fn test_constructor_rejects_bad_gains() {
        assert!(matches!(Ramsete::new(0.0, 0.7), Err(KinematicsError::InvalidGain(_))));
        assert!(matches!(Ramsete::new(2.0, -0.1), Err(KinematicsError::InvalidGain(_))));
        assert!(matches!(Ramsete::new(f64::INFINITY, 0.7), Err(KinematicsError::InvalidGain(_))));
    }

    #[test]
    fn test_zero_error_returns_reference() {
        let pose = Pose::new(1.2, -0.4, 0.9);
        let reference = ChassisSpeeds::new(0.6, -0.3);
        let out = controller().calculate(pose, pose, reference);
        assert_eq!(out, reference);
    }

    #[test]
    fn test_zero_error_wheel_speeds_match_inverse_kinematics() {
        let robot = RobotKinematics::new(0.3, 0.2, 1.0, 2.0).unwrap();
        let pose = Pose::new(0.0, 0.0, -2.0);
        let reference = ChassisSpeeds::new(0.5, 0.8);
        let wheels = controller().wheel_speeds(&robot, pose, pose, reference);
        assert_eq!(wheels, robot.inverse_kinematics(reference));
    }

    #[test]
    fn test_error_is_rotated_into_robot_frame() {
        // Robot faces +y, reference is 1 m ahead of it along +y.
        let current = Pose::new(0.0, 0.0, FRAC_PI_2);
        let reference = Pose::new(0.0, 1.0, FRAC_PI_2);
        let error = TrackingError::between(current, reference);
        assert!((error.forward - 1.0).abs() < EPSILON);
        assert!(error.lateral.abs() < EPSILON);
        assert!(error.heading.abs() < EPSILON);

        // Reference 1 m to the robot's left (world -x when facing +y).
        let left = TrackingError::between(current, Pose::new(-1.0, 0.0, FRAC_PI_2));
        assert!(left.forward.abs() < EPSILON);
        assert!((left.lateral - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_heading_error_wraps_to_half_open_interval() {
        let error = TrackingError::between(Pose::new(0.0, 0.0, -PI + 0.1), Pose::new(0.0, 0.0, PI - 0.1));
        assert!((error.heading - (-0.2)).abs() < EPSILON);

        let opposite = TrackingError::between(Pose::new(0.0, 0.0, 0.0), Pose::new(0.0, 0.0, -PI));
        assert!((opposite.heading - PI).abs() < EPSILON);
    }

    #[test]
    fn test_forward_error_speeds_up() {
        let reference = ChassisSpeeds::new(0.5, 0.0);
        let out = controller().calculate(Pose::default(), Pose::new(0.1, 0.0, 0.0), reference);
        // k = 2 * 0.7 * sqrt(2 * 0.25)
        let k = 1.4 * (0.5_f64).sqrt();
        assert!((out.v - (0.5 + k * 0.1)).abs() < EPSILON);
        assert!(out.omega.abs() < EPSILON);
    }

    #[test]
    fn test_lateral_error_turns_towards_reference() {
        let reference = ChassisSpeeds::new(0.5, 0.0);
        let out = controller().calculate(Pose::default(), Pose::new(0.0, 0.05, 0.0), reference);
        // sinc(0) limit: omega = b * v * e_y
        assert!((out.omega - 2.0 * 0.5 * 0.05).abs() < EPSILON);
        assert!(out.omega > 0.0);
    }

    #[test]
    fn test_sinc_limit_is_continuous() {
        assert_eq!(sinc(0.0), 1.0);
        assert!((sinc(1e-6) - 1.0).abs() < 1e-11);
        assert!((sinc(FRAC_PI_2) - 2.0 / PI).abs() < EPSILON);
    }
}
