//! Axis-angle conversions.

use super::quaternion::Quaternion;
use crate::batch::{Scalar, Vector3};
use crate::error::RotationResult;

impl Quaternion {
    /// Rotation by `angle` about `axis`: `(cos(θ/2), sin(θ/2)·axis/|axis|)`.
    ///
    /// The angle may carry any angle units. Zero-length axes are masked.
    pub fn from_rotation(angle: &Scalar, axis: &Vector3, recursive: bool) -> RotationResult<Self> {
        let half = angle.to_radians()?.scale_const(0.5);
        let cos_half = half.cos(recursive)?;
        let sin_half = half.sin(recursive)?;

        let inverse_length = axis.norm(recursive)?.reciprocal(recursive)?;
        let factor = sin_half.multiply(&inverse_length, recursive)?;
        let vector = Vector3(axis.scale(&factor, recursive)?.into_batch().with_units(None));

        Self::from_parts(&cos_half, &vector, recursive)
    }

    /// Rotation angle in radians and unit axis.
    ///
    /// The axis is undefined for a zero rotation; those elements are masked.
    pub fn to_rotation(&self, recursive: bool) -> RotationResult<(Scalar, Vector3)> {
        let (cos_half, vector) = self.to_parts(recursive)?;
        let sin_half = vector.norm(recursive)?;
        let angle = sin_half.atan2(&cos_half, recursive)?.scale_const(2.0);
        let axis = vector.divide(&sin_half, recursive)?;
        Ok((angle, axis))
    }
}
