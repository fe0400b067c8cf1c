//! Quaternion algebra: Hamilton product, conjugate, reciprocal and division.

use std::borrow::Cow;

use ndarray::Axis;

use super::quaternion::{IDENTITY, Quaternion};
use crate::batch::{Batch, Scalar, Vector3, broadcast_shape, map_derivs, merge_derivs};
use crate::error::{RotationError, RotationResult};

/// Right-hand side of a quaternion product.
///
/// Vectors are promoted to pure quaternions before the product is taken.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    Quaternion(&'a Quaternion),
    Vector3(&'a Vector3),
}

impl<'a> From<&'a Quaternion> for Operand<'a> {
    fn from(value: &'a Quaternion) -> Self {
        Self::Quaternion(value)
    }
}

impl<'a> From<&'a Vector3> for Operand<'a> {
    fn from(value: &'a Vector3) -> Self {
        Self::Vector3(value)
    }
}

impl<'a> Operand<'a> {
    fn promote(self, recursive: bool) -> RotationResult<Cow<'a, Quaternion>> {
        match self {
            Self::Quaternion(q) => Ok(Cow::Borrowed(q)),
            Self::Vector3(v) => Ok(Cow::Owned(Quaternion::from_vector_part(v, recursive)?)),
        }
    }
}

/// Hamilton product of two `(w, x, y, z)` quaternions.
#[inline]
pub(crate) fn hamilton_product(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
    [
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] - a[1] * b[3] + a[2] * b[0] + a[3] * b[1],
        a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + a[3] * b[0],
    ]
}

/// Batched Hamilton product.
///
/// The result denominator is `a.denom ++ b.denom`; at most one of them may
/// be non-empty. The product rule gives `d(ab) = da·b + a·db`.
fn multiply_batches(a: &Batch, b: &Batch, recursive: bool) -> RotationResult<Batch> {
    if a.drank() > 0 && b.drank() > 0 {
        return Err(RotationError::DualDenominators {
            op: "Quaternion::multiply",
            left: a.drank(),
            right: b.drank(),
        });
    }

    let shape = broadcast_shape(&[a.shape(), b.shape()])?;
    let left = a.without_derivs().broadcast_to(&shape)?;
    let right = b.without_derivs().broadcast_to(&shape)?;

    let lb = left.blocks()?;
    let rb = right.blocks()?;
    let (nb, _, na) = lb.dim();
    let nr = rb.dim().2;

    let mut data = vec![0.0; nb * 4 * na * nr];
    for e in 0..nb {
        for i in 0..na {
            let p = [lb[[e, 0, i]], lb[[e, 1, i]], lb[[e, 2, i]], lb[[e, 3, i]]];
            for j in 0..nr {
                let q = [rb[[e, 0, j]], rb[[e, 1, j]], rb[[e, 2, j]], rb[[e, 3, j]]];
                let product = hamilton_product(p, q);
                for (c, value) in product.into_iter().enumerate() {
                    data[((e * 4 + c) * na + i) * nr + j] = value;
                }
            }
        }
    }

    let mut denom = left.denom().to_vec();
    denom.extend_from_slice(right.denom());
    let mask = left.mask().or(right.mask(), &shape)?;
    let mut result = Batch::from_flat(&shape, Quaternion::NUMER, &denom, data, mask)?;

    if recursive {
        let da = map_derivs(a.derivs(), |d| multiply_batches(d, &right, false))?;
        let db = map_derivs(b.derivs(), |d| multiply_batches(&left, d, false))?;
        result.insert_derivs(merge_derivs(da, db)?)?;
    }

    Ok(result)
}

fn conj_batch(batch: &Batch) -> Batch {
    let mut values = batch.values().clone();
    let axis = Axis(batch.rank());
    for c in 1..4 {
        values.index_axis_mut(axis, c).mapv_inplace(|v| -v);
    }
    Batch::assemble(values, batch.mask().clone(), 1, batch.drank())
}

impl Quaternion {
    /// Hamilton product `self * rhs`.
    ///
    /// Fails with [`RotationError::DualDenominators`] when both operands
    /// carry a denominator.
    pub fn multiply<'a>(&self, rhs: impl Into<Operand<'a>>, recursive: bool) -> RotationResult<Self> {
        let rhs = rhs.into().promote(recursive)?;
        Ok(Self(multiply_batches(&self.0, &rhs.0, recursive)?))
    }

    /// Hamilton product `lhs * self`.
    pub fn rmultiply<'a>(&self, lhs: impl Into<Operand<'a>>, recursive: bool) -> RotationResult<Self> {
        let lhs = lhs.into().promote(recursive)?;
        Ok(Self(multiply_batches(&lhs.0, &self.0, recursive)?))
    }

    /// `self * rhs⁻¹`. Zero-norm divisors are masked.
    pub fn divide<'a>(&self, rhs: impl Into<Operand<'a>>, recursive: bool) -> RotationResult<Self> {
        let rhs = rhs.into().promote(recursive)?;
        self.multiply(&rhs.reciprocal(recursive)?, recursive)
    }

    /// Negate the vector part.
    pub fn conj(&self, recursive: bool) -> RotationResult<Self> {
        let mut result = conj_batch(&self.0);
        if recursive {
            result.insert_derivs(map_derivs(self.derivs(), |d| Ok(conj_batch(d)))?)?;
        }
        Ok(Self(result))
    }

    /// Sum of the squared components.
    pub fn norm_sq(&self, recursive: bool) -> RotationResult<Scalar> {
        Ok(Scalar(self.0.norm_sq(recursive)?))
    }

    pub fn norm(&self, recursive: bool) -> RotationResult<Scalar> {
        Ok(Scalar(self.0.norm(recursive)?))
    }

    /// Multiplicative inverse `conj(q) / |q|²`. Zero-norm elements are masked.
    pub fn reciprocal(&self, recursive: bool) -> RotationResult<Self> {
        let inverse_norm_sq = self.norm_sq(recursive)?.reciprocal(recursive)?;
        self.conj(recursive)?.scale(&inverse_norm_sq, recursive)
    }

    /// Multiply every component by a batched scalar.
    pub fn scale(&self, factor: &Scalar, recursive: bool) -> RotationResult<Self> {
        Ok(Self(self.0.scale(factor.as_batch(), recursive)?))
    }

    /// The identity rotation `(1, 0, 0, 0)`, read-only.
    pub fn identity() -> Self {
        IDENTITY.clone()
    }
}
