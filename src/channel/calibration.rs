//! # Calibration Module
//!
//! Two-point linear scaling from raw converter counts to physical units.
//!
//! The line through the zero point `(x0, y0)` and the full-scale point
//! `(x1, y1)` is
//!
//! `physical = m * raw + b` with `m = (y1 - y0) / (x1 - x0)` and `b = y1 - m * x1`
//!
//! ## Usage
//!
//! ```
//! use energy_meter::channel::calibration::{CalibrationLine, CalibrationPoint};
//!
//! let line = CalibrationLine::from_points(
//!     CalibrationPoint::new(0.0, 0.0),
//!     CalibrationPoint::new(1000.0, 100.0),
//! )?;
//! assert!((line.scale(500.0) - 50.0).abs() < 1e-9);
//! # Ok::<(), energy_meter::error::MeterError>(())
//! ```

use serde::Deserialize;

use crate::error::{MeterError, Result};

/// A `(raw, physical)` reference pair
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "(f64, f64)")]
pub struct CalibrationPoint {
    /// Raw converter count
    pub raw: f64,
    /// Physical value at that count
    pub physical: f64,
}

impl CalibrationPoint {
    #[must_use]
    pub fn new(raw: f64, physical: f64) -> Self {
        Self { raw, physical }
    }
}

impl From<(f64, f64)> for CalibrationPoint {
    fn from((raw, physical): (f64, f64)) -> Self {
        Self::new(raw, physical)
    }
}

/// Linear mapping derived once from two calibration points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationLine {
    slope: f64,
    intercept: f64,
}

impl CalibrationLine {
    /// Derive slope and intercept from two reference points
    ///
    /// # Errors
    ///
    /// Returns a configuration error if both points share the same raw value
    /// (vertical line) or a coordinate is not finite
    pub fn from_points(zero: CalibrationPoint, full_scale: CalibrationPoint) -> Result<Self> {
        let coordinates = [zero.raw, zero.physical, full_scale.raw, full_scale.physical];
        if coordinates.iter().any(|v| !v.is_finite()) {
            return Err(MeterError::Config(
                "calibration points must be finite numbers".to_string(),
            ));
        }

        let dx = full_scale.raw - zero.raw;
        if dx == 0.0 {
            return Err(MeterError::Config(format!(
                "calibration points share the raw value {}",
                zero.raw
            )));
        }

        let slope = (full_scale.physical - zero.physical) / dx;
        let intercept = full_scale.physical - slope * full_scale.raw;
        Ok(Self { slope, intercept })
    }

    /// Identity mapping (raw counts pass through unchanged)
    #[must_use]
    pub fn identity() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }

    #[must_use]
    pub fn slope(&self) -> f64 {
        self.slope
    }

    #[must_use]
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Map a raw count onto the physical scale
    #[inline]
    #[must_use]
    pub fn scale(&self, raw: f64) -> f64 {
        self.slope * raw + self.intercept
    }
}
