//! Batched numeric values with masks and named derivatives.
//!
//! This module provides the container every rotation type is built on:
//! - [`Batch`]: an N-dimensional buffer split into batch, numerator and
//!   denominator axes, plus a validity [`Mask`] and a [`Derivs`] map
//! - [`Scalar`], [`Vector3`], [`Matrix3`]: typed views with numerator shapes
//!   `()`, `(3)` and `(3, 3)`
//! - [`Units`]: units of measure for angle inputs
//!
//! Operations never mutate their operands. Each one allocates a new value
//! and attaches its freshly computed derivative map before returning it.

use crate::error::{RotationError, RotationResult};

pub mod container;
pub mod derivs;
pub mod mask;
pub mod matrix3;
pub mod scalar;
pub mod units;
pub mod vector3;

pub use container::Batch;
pub use derivs::{Derivs, map_derivs, merge_derivs};
pub use mask::Mask;
pub use matrix3::Matrix3;
pub use scalar::Scalar;
pub use units::Units;
pub use vector3::Vector3;

/// Common batch shape of several shapes, following right-aligned broadcasting.
///
/// Dimensions are compared from the trailing end; a dimension of 1 stretches
/// to match the other, and missing leading dimensions count as 1.
pub fn broadcast_shape(shapes: &[&[usize]]) -> RotationResult<Vec<usize>> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = vec![1; rank];

    for shape in shapes {
        let offset = rank - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let current = result[offset + i];
            if current == 1 {
                result[offset + i] = dim;
            } else if dim != 1 && dim != current {
                return Err(RotationError::BroadcastMismatch {
                    left: result.clone(),
                    right: shape.to_vec(),
                });
            }
        }
    }

    Ok(result)
}

/// Implements the shared conversions and accessors of a typed batch wrapper.
macro_rules! batch_wrapper {
    ($name:ident, $label:literal, [$($numer:expr),*], units = $units_ok:literal) => {
        impl $name {
            /// Numerator shape of every element.
            pub const NUMER: &'static [usize] = &[$($numer),*];

            /// Wrap a batch, checking its numerator shape and units.
            pub fn from_batch(batch: $crate::batch::Batch) -> $crate::error::RotationResult<Self> {
                batch.require_numer($label, Self::NUMER)?;
                if !$units_ok && batch.units().is_some() {
                    return Err($crate::error::RotationError::UnitsNotAllowed($label));
                }
                Ok(Self(batch))
            }

            pub fn as_batch(&self) -> &$crate::batch::Batch {
                &self.0
            }

            pub fn into_batch(self) -> $crate::batch::Batch {
                self.0
            }

            /// A copy of this value with its derivative map removed.
            pub fn without_derivs(&self) -> Self {
                Self(self.0.without_derivs())
            }

            /// Mark this value as shared and immutable.
            pub fn as_readonly(self) -> Self {
                Self(self.0.as_readonly())
            }

            /// Derivative with respect to `key`, if present.
            pub fn deriv(&self, key: &str) -> Option<Self> {
                self.0.deriv(key).cloned().map(Self)
            }

            /// Attach the derivative with respect to `key`.
            pub fn insert_deriv(
                &mut self,
                key: impl Into<String>,
                deriv: Self,
            ) -> $crate::error::RotationResult<()> {
                self.0.insert_deriv(key, deriv.0)
            }

            /// Replace the mask.
            pub fn with_mask(self, mask: $crate::batch::Mask) -> $crate::error::RotationResult<Self> {
                Ok(Self(self.0.with_mask(mask)?))
            }

            /// Broadcast to a batch shape.
            pub fn broadcast_to(&self, shape: &[usize]) -> $crate::error::RotationResult<Self> {
                Ok(Self(self.0.broadcast_to(shape)?))
            }
        }

        impl std::ops::Deref for $name {
            type Target = $crate::batch::Batch;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$name> for $crate::batch::Batch {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

pub(crate) use batch_wrapper;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shape_aligns_trailing_axes() {
        assert_eq!(broadcast_shape(&[&[3, 1], &[4]]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shape(&[&[], &[2, 5]]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_shape(&[]).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_broadcast_shape_mismatch() {
        assert!(matches!(
            broadcast_shape(&[&[3], &[4]]),
            Err(RotationError::BroadcastMismatch { .. })
        ));
    }
}
