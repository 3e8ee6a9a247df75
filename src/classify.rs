//! Severity classification of one detection's inertial evidence.
//!
//! The accelerometer is read with fixed at-rest offsets removed from the
//! y and z axes (gravity and mounting bias of the phone holder). The
//! gyroscope is read raw. The larger of the two peaks decides the category.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregate::AggregatedGroup;
use crate::InertialSample;

pub const DEFAULT_MODERATE_ABOVE: f64 = 13.0;
pub const DEFAULT_SEVERE_ABOVE: f64 = 25.0;
pub const DEFAULT_ACCEL_Y_OFFSET: f64 = 8.0;
pub const DEFAULT_ACCEL_Z_OFFSET: f64 = 3.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeverityCategory {
    Minor,
    Moderate,
    Severe,
}

impl SeverityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SeverityCategory::Minor => "Minor",
            SeverityCategory::Moderate => "Moderate",
            SeverityCategory::Severe => "Severe",
        }
    }

    /// Marker title prefix, e.g. `"Severe Pothole"`.
    pub fn title(self) -> String {
        format!("{} Pothole", self.as_str())
    }
}

impl fmt::Display for SeverityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and calibration offsets.
///
/// The defaults are empirical values from the field deployment and are
/// kept as-is; they are not derived from physical constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    /// Peak readings strictly above this are at least Moderate.
    pub moderate_above: f64,
    /// Peak readings strictly above this are Severe.
    pub severe_above: f64,
    pub accel_y_offset: f64,
    pub accel_z_offset: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            moderate_above: DEFAULT_MODERATE_ABOVE,
            severe_above: DEFAULT_SEVERE_ABOVE,
            accel_y_offset: DEFAULT_ACCEL_Y_OFFSET,
            accel_z_offset: DEFAULT_ACCEL_Z_OFFSET,
        }
    }
}

impl SeverityPolicy {
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.moderate_above,
            self.severe_above,
            self.accel_y_offset,
            self.accel_z_offset,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("severity policy values must be finite"));
        }
        if self.moderate_above >= self.severe_above {
            return Err(anyhow!(
                "moderate threshold ({}) must be below severe threshold ({})",
                self.moderate_above,
                self.severe_above
            ));
        }
        Ok(())
    }

    pub fn category_for(&self, max_reading: f64) -> SeverityCategory {
        if max_reading > self.severe_above {
            SeverityCategory::Severe
        } else if max_reading > self.moderate_above {
            SeverityCategory::Moderate
        } else {
            SeverityCategory::Minor
        }
    }

    fn calibrated_accel(&self, sample: &InertialSample) -> [f64; 3] {
        [
            sample.x,
            sample.y - self.accel_y_offset,
            sample.z - self.accel_z_offset,
        ]
    }

    pub fn assess(&self, group: &AggregatedGroup) -> SeverityAssessment {
        let max_accel = peak_abs(group.accelerometer().flat_map(|s| self.calibrated_accel(s)));
        let max_gyro = peak_abs(group.gyroscope().flat_map(InertialSample::axes));
        let category = self.category_for(max_accel.max(max_gyro));
        SeverityAssessment {
            category,
            max_accel,
            max_gyro,
        }
    }
}

/// Largest absolute value, `0.0` for an empty sequence.
fn peak_abs(values: impl Iterator<Item = f64>) -> f64 {
    values.map(f64::abs).fold(0.0, f64::max)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub category: SeverityCategory,
    pub max_accel: f64,
    pub max_gyro: f64,
}

impl SeverityAssessment {
    pub fn max_reading(&self) -> f64 {
        self.max_accel.max(self.max_gyro)
    }

    /// `"<Category> Pothole : <maxAccel> , <maxGyro>"`, peaks at sensor
    /// precision and printed the way the device app prints floats.
    pub fn label(&self) -> String {
        format!(
            "{} : {} , {}",
            self.category.title(),
            format_reading(self.max_accel as f32),
            format_reading(self.max_gyro as f32)
        )
    }
}

/// Plain decimal for magnitudes in `[1e-3, 1e7)` and zero, otherwise
/// `<mantissa>E<exponent>` (`5.0E-4`, `1.2345678E7`). Shortest round-trip
/// digits, always with a fractional part.
fn format_reading(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{value:?}");
    }
    let scientific = format!("{value:e}");
    match scientific.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => format!("{mantissa}E{exponent}"),
        Some((mantissa, exponent)) => format!("{mantissa}.0E{exponent}"),
        None => scientific,
    }
}
