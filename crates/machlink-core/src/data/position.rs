//! Fixed-precision positions
//!
//! Every coordinate that leaves the telemetry parser is rounded to the
//! configured number of decimals, so two reports that only differ below that
//! precision compare equal and do not produce a new event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal precision applied to reported coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    decimals: u32,
}

impl Precision {
    /// Largest supported precision; f64 stops being exact beyond this
    pub const MAX_DECIMALS: u32 = 6;

    /// Create a precision, clamped to [`Self::MAX_DECIMALS`]
    pub fn new(decimals: u32) -> Self {
        Self {
            decimals: decimals.min(Self::MAX_DECIMALS),
        }
    }

    /// Number of decimals kept
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Round a raw value to this precision
    pub fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.decimals as i32);
        let rounded = (value * scale).round() / scale;
        // avoid "-0.000" flapping against "0.000"
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    }

    /// Format a value with exactly this many decimals
    pub fn format(&self, value: f64) -> String {
        format!("{:.*}", self.decimals as usize, self.round(value))
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A point on the X/Y/Z axes plus an optional 4th axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisPoint {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// 4th axis, only present once a firmware has reported one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub a: Option<f64>,
}

impl AxisPoint {
    /// Create a 3-axis point
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, a: None }
    }

    /// Set the 4th axis
    pub fn with_a(mut self, a: f64) -> Self {
        self.a = Some(a);
        self
    }

    /// Round every axis to `precision`
    pub fn rounded(&self, precision: Precision) -> Self {
        Self {
            x: precision.round(self.x),
            y: precision.round(self.y),
            z: precision.round(self.z),
            a: self.a.map(|a| precision.round(a)),
        }
    }

    /// Component-wise difference `self - other`
    ///
    /// The 4th axis is kept when `self` has one; a missing 4th axis on
    /// `other` counts as zero.
    pub fn minus(&self, other: &AxisPoint) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: self.a.map(|a| a - other.a.unwrap_or(0.0)),
        }
    }
}

impl fmt::Display for AxisPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{} Y:{} Z:{}", self.x, self.y, self.z)?;
        if let Some(a) = self.a {
            write!(f, " A:{}", a)?;
        }
        Ok(())
    }
}
