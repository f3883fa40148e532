//! Cubic Bézier curve evaluation.
//!
//! ```text
//! P(t)   = (1-t)³·P0 + 3(1-t)²t·P1 + 3(1-t)t²·P2 + t³·P3
//! P'(t)  = 3(1-t)²·(P1-P0) + 6(1-t)t·(P2-P1) + 3t²·(P3-P2)
//! P''(t) = 6(1-t)·(P2-2P1+P0) + 6t·(P3-2P2+P1)
//! ```
//!
//! Derivatives are taken with respect to the curve parameter, not arc length.

use nalgebra::Vector2;

/// Below this parametric speed a point is treated as stationary and its
/// curvature is reported as `0.0`.
pub const SPEED_EPSILON: f64 = 1e-9;

/// Parametric speed, relative to the size of the control polygon, at or
/// below which a point counts as stationary.
pub const STATIONARY_TOLERANCE: f64 = 1e-6;

/// Signed curvature of a curve with the given first and second derivatives.
///
/// Positive curvature turns counter-clockwise. Returns `0.0` when the speed
/// is below [`SPEED_EPSILON`]; paths containing such points are rejected when
/// they are loaded, so the sentinel is never used for motion.
pub fn curvature(velocity: Vector2<f64>, acceleration: Vector2<f64>) -> f64 {
    let speed = velocity.norm();
    if speed < SPEED_EPSILON {
        return 0.0;
    }
    (velocity.x * acceleration.y - velocity.y * acceleration.x) / (speed * speed * speed)
}

/// One cubic Bézier segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    points: [Vector2<f64>; 4],
}

impl CubicBezier {
    /// Curve from its start anchor, two control points and end anchor.
    pub fn new(p0: Vector2<f64>, p1: Vector2<f64>, p2: Vector2<f64>, p3: Vector2<f64>) -> Self {
        Self {
            points: [p0, p1, p2, p3],
        }
    }

    /// The four control vectors, anchors first and last.
    pub fn control_points(&self) -> &[Vector2<f64>; 4] {
        &self.points
    }

    pub fn position(&self, t: f64) -> Vector2<f64> {
        let [p0, p1, p2, p3] = self.points;
        let u = 1.0 - t;
        p0 * (u * u * u) + p1 * (3.0 * u * u * t) + p2 * (3.0 * u * t * t) + p3 * (t * t * t)
    }

    pub fn velocity(&self, t: f64) -> Vector2<f64> {
        let [p0, p1, p2, p3] = self.points;
        let u = 1.0 - t;
        (p1 - p0) * (3.0 * u * u) + (p2 - p1) * (6.0 * u * t) + (p3 - p2) * (3.0 * t * t)
    }

    pub fn acceleration(&self, t: f64) -> Vector2<f64> {
        let [p0, p1, p2, p3] = self.points;
        (p2 - p1 * 2.0 + p0) * (6.0 * (1.0 - t)) + (p3 - p2 * 2.0 + p1) * (6.0 * t)
    }

    pub fn curvature(&self, t: f64) -> f64 {
        curvature(self.velocity(t), self.acceleration(t))
    }

    /// Arc length between two parameters by summing chords of at most
    /// `step` in `t`.
    ///
    /// Chords cut corners, so the result slightly under-estimates the true
    /// length on curved sections and converges from below as `step` shrinks.
    /// Returns `0.0` when `t1 <= t0`.
    pub fn length_between(&self, t0: f64, t1: f64, step: f64) -> f64 {
        if t1 <= t0 {
            return 0.0;
        }
        let chords = ((t1 - t0) / step).ceil().max(1.0) as usize;
        let dt = (t1 - t0) / chords as f64;

        let mut length = 0.0;
        let mut last = self.position(t0);
        for i in 1..=chords {
            let next = self.position(t0 + dt * i as f64);
            length += (next - last).norm();
            last = next;
        }
        length
    }

    /// Full length of the segment.
    pub fn length(&self, step: f64) -> f64 {
        self.length_between(0.0, 1.0, step)
    }

    /// Whether the curve stops anywhere in `[0, 1]`, cusps included.
    ///
    /// `P'(t)` vanishes only where both of its components do, so the
    /// candidates are the roots of each component's quadratic plus the two
    /// ends. A candidate counts when its speed is within
    /// [`STATIONARY_TOLERANCE`] of the size of the control polygon.
    pub fn has_stationary_point(&self) -> bool {
        let [p0, p1, p2, p3] = self.points;
        let (a, b, c) = (p1 - p0, p2 - p1, p3 - p2);
        let scale = a.norm() + b.norm() + c.norm();
        if scale < SPEED_EPSILON {
            return true;
        }
        // P'(t) / 3 = a + 2(b - a)·t + (a - 2b + c)·t²
        let linear = (b - a) * 2.0;
        let quadratic = a - b * 2.0 + c;
        let tolerance = 3.0 * STATIONARY_TOLERANCE * scale;

        [0.0, 1.0]
            .into_iter()
            .chain(unit_roots(quadratic.x, linear.x, a.x))
            .chain(unit_roots(quadratic.y, linear.y, a.y))
            .any(|t| self.velocity(t).norm() <= tolerance)
    }
}

/// Real roots of `a·t² + b·t + c` that lie in `[0, 1]`. Without a real root,
/// the vertex, where the polynomial is closest to zero.
fn unit_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    let discriminant = b * b - 4.0 * a * c;
    let roots = if discriminant < 0.0 {
        vec![-b / (2.0 * a)]
    } else {
        // q form keeps the smaller root accurate when `a` is tiny
        let q = -0.5 * (b + b.signum() * discriminant.sqrt());
        let mut roots = Vec::with_capacity(2);
        if a != 0.0 {
            roots.push(q / a);
        }
        if q != 0.0 {
            roots.push(c / q);
        }
        roots
    };
    roots.into_iter().filter(|t| (0.0..=1.0).contains(t)).collect()
}
