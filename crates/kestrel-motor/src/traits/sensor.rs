use std::sync::Arc;

use crate::error::SensorError;

/// A wheel-rotation sensor.
pub trait WheelEncoder: Send + Sync {
    /// Signed wheel rotation in revolutions. Positive drives the robot forward.
    fn rotation(&self) -> Result<f64, SensorError>;
}

/// An absolute heading sensor (gyro).
pub trait HeadingSensor: Send + Sync {
    /// Current heading in radians, counter-clockwise positive.
    fn heading_radians(&self) -> Result<f64, SensorError>;

    /// Re-bias the sensor so that the current physical heading reads `angle`.
    fn reset_heading(&self, angle: f64) -> Result<(), SensorError>;
}

impl<T: WheelEncoder + ?Sized> WheelEncoder for Arc<T> {
    fn rotation(&self) -> Result<f64, SensorError> {
        (**self).rotation()
    }
}

impl<T: HeadingSensor + ?Sized> HeadingSensor for Arc<T> {
    fn heading_radians(&self) -> Result<f64, SensorError> {
        (**self).heading_radians()
    }

    fn reset_heading(&self, angle: f64) -> Result<(), SensorError> {
        (**self).reset_heading(angle)
    }
}

/// Two heading sensors read as one by taking their circular mean.
///
/// A failure of either sensor fails the read; averaging a single good value
/// with a stale one would hide the fault.
#[derive(Debug, Clone)]
pub struct DualHeadingSensor<A, B> {
    first: A,
    second: B,
}

impl<A: HeadingSensor, B: HeadingSensor> DualHeadingSensor<A, B> {
    /// Combine two sensors mounted with the same orientation.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: HeadingSensor, B: HeadingSensor> HeadingSensor for DualHeadingSensor<A, B> {
    fn heading_radians(&self) -> Result<f64, SensorError> {
        let a = self.first.heading_radians()?;
        let b = self.second.heading_radians()?;
        // circular mean, so that readings either side of ±PI do not average to 0
        Ok((a.sin() + b.sin()).atan2(a.cos() + b.cos()))
    }

    fn reset_heading(&self, angle: f64) -> Result<(), SensorError> {
        self.first.reset_heading(angle)?;
        self.second.reset_heading(angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::f64::consts::PI;

    struct FixedHeading(Mutex<f64>);

    impl HeadingSensor for FixedHeading {
        fn heading_radians(&self) -> Result<f64, SensorError> {
            Ok(*self.0.lock())
        }

        fn reset_heading(&self, angle: f64) -> Result<(), SensorError> {
            *self.0.lock() = angle;
            Ok(())
        }
    }

    struct BrokenHeading;

    impl HeadingSensor for BrokenHeading {
        fn heading_radians(&self) -> Result<f64, SensorError> {
            Err(SensorError::Heading("unplugged".into()))
        }

        fn reset_heading(&self, _angle: f64) -> Result<(), SensorError> {
            Err(SensorError::Heading("unplugged".into()))
        }
    }

    #[test]
    fn test_dual_heading_averages() {
        let dual = DualHeadingSensor::new(FixedHeading(Mutex::new(0.2)), FixedHeading(Mutex::new(0.4)));
        assert!((dual.heading_radians().unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_dual_heading_averages_across_seam() {
        let dual = DualHeadingSensor::new(
            FixedHeading(Mutex::new(PI - 0.1)),
            FixedHeading(Mutex::new(-PI + 0.1)),
        );
        let mean = dual.heading_radians().unwrap();
        assert!((mean.abs() - PI).abs() < 1e-9);
    }

    #[test]
    fn test_dual_heading_reset_and_fault() {
        let dual = DualHeadingSensor::new(FixedHeading(Mutex::new(1.0)), FixedHeading(Mutex::new(2.0)));
        dual.reset_heading(0.5).unwrap();
        assert!((dual.heading_radians().unwrap() - 0.5).abs() < 1e-12);

        let faulty = DualHeadingSensor::new(FixedHeading(Mutex::new(0.0)), BrokenHeading);
        assert!(matches!(faulty.heading_radians(), Err(SensorError::Heading(_))));
    }
}
