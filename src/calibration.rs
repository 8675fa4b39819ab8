//! Raw ADC counts to calibrated weight

use serde::{Deserialize, Serialize};

use crate::{ADC_FULL_SCALE, SCALE_CAL, ZERO_CAL};

/// Load-cell calibration: `weight = (raw / 2^31 - zero) / scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub zero: f64,
    pub scale: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            zero: ZERO_CAL,
            scale: SCALE_CAL,
        }
    }
}

impl Calibration {
    /// NaN when `scale` is zero
    pub fn weight(&self, raw: f64) -> f64 {
        if self.scale == 0.0 {
            return f64::NAN;
        }
        (raw / ADC_FULL_SCALE - self.zero) / self.scale
    }

    pub fn weight_of(&self, raw: i64) -> f64 {
        self.weight(raw as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_count() {
        let cal = Calibration {
            zero: 0.01823035255075,
            scale: 0.00000451794631,
        };
        let w = cal.weight_of(0);
        assert!((w - (-4035.0972)).abs() < 1e-3, "{w}");
        assert_eq!(cal, Calibration::default());
    }

    #[test]
    fn test_full_scale() {
        let cal = Calibration {
            zero: 0.0,
            scale: 1.0,
        };
        assert_eq!(cal.weight_of(1 << 31), 1.0);
        assert_eq!(cal.weight_of(-(1 << 30)), -0.5);
    }

    #[test]
    fn test_zero_scale_is_nan() {
        let cal = Calibration {
            zero: 0.1,
            scale: 0.0,
        };
        assert!(cal.weight_of(12345).is_nan());
    }
}
