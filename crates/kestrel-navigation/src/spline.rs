//! Piecewise cubic Bézier spline indexed by `(segment, t)`.

use std::cmp::Ordering;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::bezier::CubicBezier;
use crate::error::NavigationError;

/// Default parameter step used for arc-length integration.
pub const DEFAULT_ARC_STEP: f64 = 0.001;

/// A point on a [`Spline`]: segment index and parameter within it.
///
/// The end of segment `i` (`t == 1`) and the start of segment `i + 1`
/// (`t == 0`) are the same point on the curve but keep separate
/// locations, because the tangent may differ on either side of a reversal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SplineLocation {
    pub segment: usize,
    pub t: f64,
}

impl SplineLocation {
    /// Start of the first segment.
    pub const START: SplineLocation = SplineLocation { segment: 0, t: 0.0 };

    pub const fn new(segment: usize, t: f64) -> Self {
        Self { segment, t }
    }

    /// Location from a global spline parameter `u = segment + t`.
    ///
    /// `u == segment_count` maps to the end of the last segment.
    pub fn from_parameter(u: f64, segment_count: usize) -> Self {
        let last = segment_count.saturating_sub(1);
        let segment = (u.floor().max(0.0) as usize).min(last);
        Self {
            segment,
            t: (u - segment as f64).clamp(0.0, 1.0),
        }
    }

    /// The global spline parameter `segment + t`.
    pub fn parameter(&self) -> f64 {
        self.segment as f64 + self.t
    }
}

impl PartialOrd for SplineLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.segment.cmp(&other.segment) {
            Ordering::Equal => self.t.partial_cmp(&other.t),
            ordering => Some(ordering),
        }
    }
}

/// Chain of Bézier segments sharing their boundary anchors.
#[derive(Debug, Clone, PartialEq)]
pub struct Spline {
    segments: Vec<CubicBezier>,
    arc_step: f64,
}

impl Spline {
    /// Build a spline from consecutive segments.
    ///
    /// # Errors
    ///
    /// Returns [`NavigationError::Configuration`] if there are no segments,
    /// neighbouring segments do not share an anchor, or `arc_step` is not in
    /// `(0, 1]`.
    pub fn new(segments: Vec<CubicBezier>, arc_step: f64) -> Result<Self, NavigationError> {
        if segments.is_empty() {
            return Err(NavigationError::Configuration("a spline needs at least one segment".into()));
        }
        if !(arc_step > 0.0 && arc_step <= 1.0) {
            return Err(NavigationError::Configuration(format!(
                "arc step {arc_step} must be in (0, 1]"
            )));
        }
        for (i, pair) in segments.windows(2).enumerate() {
            let end = pair[0].control_points()[3];
            let start = pair[1].control_points()[0];
            if (end - start).norm() > 1e-9 {
                return Err(NavigationError::Configuration(format!(
                    "segments {i} and {} do not share an anchor",
                    i + 1
                )));
            }
        }
        Ok(Self { segments, arc_step })
    }

    pub fn segments(&self) -> &[CubicBezier] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn arc_step(&self) -> f64 {
        self.arc_step
    }

    /// End of the last segment.
    pub fn end(&self) -> SplineLocation {
        SplineLocation::new(self.segments.len() - 1, 1.0)
    }

    fn segment(&self, location: SplineLocation) -> &CubicBezier {
        &self.segments[location.segment.min(self.segments.len() - 1)]
    }

    pub fn position(&self, location: SplineLocation) -> Vector2<f64> {
        self.segment(location).position(location.t)
    }

    /// First derivative, multiplied by the traversal `direction` (±1).
    pub fn velocity(&self, location: SplineLocation, direction: f64) -> Vector2<f64> {
        self.segment(location).velocity(location.t) * direction
    }

    /// Second derivative. Unaffected by the traversal direction.
    pub fn acceleration(&self, location: SplineLocation) -> Vector2<f64> {
        self.segment(location).acceleration(location.t)
    }

    /// Signed curvature as seen when traversing in `direction`.
    pub fn curvature(&self, location: SplineLocation, direction: f64) -> f64 {
        self.segment(location).curvature(location.t) * direction
    }

    /// Direction of travel when traversing in `direction`, in `(-PI, PI]`.
    pub fn heading(&self, location: SplineLocation, direction: f64) -> f64 {
        let v = self.velocity(location, direction);
        v.y.atan2(v.x)
    }

    /// Arc length from `from` to `to`. Returns `0.0` when `to` is not after
    /// `from`.
    pub fn length_between(&self, from: SplineLocation, to: SplineLocation) -> f64 {
        if to.partial_cmp(&from) != Some(Ordering::Greater) {
            return 0.0;
        }
        if from.segment == to.segment {
            return self.segments[from.segment].length_between(from.t, to.t, self.arc_step);
        }
        let mut length = self.segments[from.segment].length_between(from.t, 1.0, self.arc_step);
        for segment in &self.segments[from.segment + 1..to.segment] {
            length += segment.length(self.arc_step);
        }
        length + self.segments[to.segment].length_between(0.0, to.t, self.arc_step)
    }

    pub fn total_length(&self) -> f64 {
        self.segments.iter().map(|s| s.length(self.arc_step)).sum()
    }

    /// Walk forward from `from` until `distance` of arc length is covered.
    ///
    /// Steps through `t` in increments of the arc step, crossing segment
    /// boundaries, and interpolates within the final chord. Stops at the
    /// end of the spline if the distance runs past it.
    pub fn advance_by_arc_length(&self, from: SplineLocation, distance: f64) -> SplineLocation {
        let mut location = from;
        let mut remaining = distance;
        if !(remaining > 0.0) {
            return location;
        }

        loop {
            if location.t >= 1.0 {
                if location.segment + 1 >= self.segments.len() {
                    return self.end();
                }
                location = SplineLocation::new(location.segment + 1, 0.0);
            }

            let segment = &self.segments[location.segment];
            let next_t = (location.t + self.arc_step).min(1.0);
            let chord = (segment.position(next_t) - segment.position(location.t)).norm();
            if chord >= remaining {
                let fraction = if chord > 0.0 { remaining / chord } else { 1.0 };
                location.t += (next_t - location.t) * fraction;
                return location;
            }
            remaining -= chord;
            location.t = next_t;
        }
    }
}
