//! Batched real scalars.

use crate::batch::{Batch, Mask, Units, batch_wrapper};
use crate::error::RotationResult;
use ndarray::{ArrayD, IxDyn};

/// A batch of real numbers, optionally carrying units.
#[derive(Clone, Debug)]
pub struct Scalar(pub(crate) Batch);

batch_wrapper!(Scalar, "Scalar", [], units = true);

impl Scalar {
    /// Create an unmasked scalar batch whose shape is the shape of `values`.
    pub fn new(values: ArrayD<f64>) -> RotationResult<Self> {
        Ok(Self(Batch::new(values, Mask::none(), 0, 0)?))
    }

    /// A single scalar with an empty batch shape.
    pub fn from_value(value: f64) -> Self {
        Self(Batch::assemble(
            ArrayD::from_elem(IxDyn(&[]), value),
            Mask::none(),
            0,
            0,
        ))
    }

    /// A one-dimensional batch of scalars.
    pub fn from_slice(values: &[f64]) -> Self {
        Self(Batch::assemble(
            ndarray::Array1::from(values.to_vec()).into_dyn(),
            Mask::none(),
            0,
            0,
        ))
    }

    /// Attach units. Values are interpreted in these units.
    pub fn with_units(self, units: Units) -> Self {
        Self(self.0.with_units(Some(units)))
    }

    /// Convert angle values into radians, dropping the units.
    ///
    /// Fails unless the units are absent or measure an angle.
    pub fn to_radians(&self) -> RotationResult<Self> {
        let factor = Units::radians_factor(self.units())?;
        let converted = if factor == 1.0 {
            self.0.clone()
        } else {
            self.0.scale_const(factor)
        };
        Ok(Self(converted.with_units(None)))
    }

    pub fn cos(&self, recursive: bool) -> RotationResult<Self> {
        let angle = self.to_radians()?;
        Ok(Self(angle.0.map_scalar("cos", f64::cos, |x| -x.sin(), recursive)?))
    }

    pub fn sin(&self, recursive: bool) -> RotationResult<Self> {
        let angle = self.to_radians()?;
        Ok(Self(angle.0.map_scalar("sin", f64::sin, f64::cos, recursive)?))
    }

    /// Four-quadrant arctangent of `self / x`, in radians.
    pub fn atan2(&self, x: &Scalar, recursive: bool) -> RotationResult<Self> {
        Ok(Self(self.0.atan2(&x.0, recursive)?))
    }

    /// Element-wise reciprocal; zero elements are masked.
    pub fn reciprocal(&self, recursive: bool) -> RotationResult<Self> {
        Ok(Self(self.0.reciprocal(recursive)?))
    }

    /// Element-wise product.
    pub fn multiply(&self, other: &Scalar, recursive: bool) -> RotationResult<Self> {
        Ok(Self(self.0.scale(&other.0, recursive)?))
    }

    pub fn scale_const(&self, factor: f64) -> Self {
        Self(self.0.scale_const(factor))
    }
}
