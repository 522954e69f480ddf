use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

/// A confidence score in `[0.0, 1.0]`.
///
/// Clamping an out-of-range value silently would mask an evaluator bug
/// that computed a bad score, so construction rejects it instead.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const CERTAIN: Confidence = Confidence(1.0);

    pub fn new(value: f64) -> Result<Self, ConstructionError> {
        if !(0.0..=1.0).contains(&value) || value.is_nan() {
            return Err(ConstructionError::OutOfRange {
                field: "confidence",
                value: value.to_string(),
                expected: "[0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::CERTAIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundary_values() {
        assert!(Confidence::new(0.0).is_ok());
        assert!(Confidence::new(1.0).is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Confidence::new(-0.1).is_err());
        assert!(Confidence::new(1.1).is_err());
        assert!(Confidence::new(f64::NAN).is_err());
    }

    #[test]
    fn default_is_certain() {
        assert_eq!(Confidence::default().value(), 1.0);
    }
}
