//! Units of measure attached to batched inputs.
//!
//! Only inputs such as rotation angles carry units. Every unit records its
//! dimension exponents and the factor that converts a value expressed in the
//! unit to the standard unit of that dimension (radians, kilometers, seconds).

use crate::error::{RotationError, RotationResult};
use std::f64::consts::PI;
use std::fmt;

/// A named unit of measure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Units {
    name: &'static str,
    length: i8,
    time: i8,
    angle: i8,
    factor: f64,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Units {
    pub const RAD: Units = Units::angle("rad", 1.0);
    pub const MRAD: Units = Units::angle("mrad", 1.0e-3);
    pub const DEG: Units = Units::angle("deg", PI / 180.0);
    pub const ARCMIN: Units = Units::angle("arcmin", PI / (180.0 * 60.0));
    pub const ARCSEC: Units = Units::angle("arcsec", PI / (180.0 * 3600.0));
    pub const KM: Units = Units::new("km", 1, 0, 0, 1.0);
    pub const M: Units = Units::new("m", 1, 0, 0, 1.0e-3);
    pub const S: Units = Units::new("s", 0, 1, 0, 1.0);

    /// Create a unit from its name, dimension exponents and conversion factor.
    pub const fn new(name: &'static str, length: i8, time: i8, angle: i8, factor: f64) -> Self {
        Self {
            name,
            length,
            time,
            angle,
            factor,
        }
    }

    const fn angle(name: &'static str, factor: f64) -> Self {
        Self::new(name, 0, 0, 1, factor)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Factor converting a value in this unit into the standard unit.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// True if this unit measures a plane angle.
    pub fn is_angle(&self) -> bool {
        self.angle == 1 && self.length == 0 && self.time == 0
    }

    /// Fail unless the units are absent or measure an angle.
    ///
    /// Values without units are interpreted as radians.
    pub fn require_angle(units: Option<&Units>) -> RotationResult<()> {
        match units {
            None => Ok(()),
            Some(u) if u.is_angle() => Ok(()),
            Some(u) => Err(RotationError::NotAnAngle(u.name.to_string())),
        }
    }

    /// Factor converting values with optional angle units into radians.
    pub fn radians_factor(units: Option<&Units>) -> RotationResult<f64> {
        Self::require_angle(units)?;
        Ok(units.map_or(1.0, |u| u.factor))
    }
}
