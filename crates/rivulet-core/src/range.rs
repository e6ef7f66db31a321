use crate::{CoreError, CoreResult};

/// Half-open presentation interval in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRange`] when `start > end` or either bound is NaN.
    pub fn new(start: f64, end: f64) -> CoreResult<Self> {
        if start.is_nan() || end.is_nan() || start > end {
            return Err(CoreError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `time` lies in the range, widened by `tolerance` on both sides.
    #[must_use]
    pub fn contains(&self, time: f64, tolerance: f64) -> bool {
        time >= self.start - tolerance && time < self.end + tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        assert!(TimeRange::new(5.0, 1.0).is_err());
        assert!(TimeRange::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn contains_honours_tolerance() {
        let r = TimeRange::new(10.0, 12.0).unwrap();
        assert!(r.contains(10.0, 0.0));
        assert!(!r.contains(12.0, 0.0));
        assert!(r.contains(12.05, 0.1));
        assert!(r.contains(9.95, 0.1));
        assert_eq!(r.duration(), 2.0);
    }
}
