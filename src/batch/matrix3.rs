//! Batched 3×3 matrices.
//!
//! Rotation matrices use this type, and so do their derivatives, which carry
//! one extra denominator axis and are in general not orthogonal.

use crate::batch::{Batch, Mask, batch_wrapper};
use crate::error::RotationResult;
use ndarray::{ArrayD, IxDyn};

/// A batch of 3×3 matrices, indexed `[..., row, column]`.
#[derive(Clone, Debug)]
pub struct Matrix3(pub(crate) Batch);

batch_wrapper!(Matrix3, "Matrix3", [3, 3], units = true);

impl Matrix3 {
    /// Create an unmasked batch from a buffer whose last two axes are 3×3.
    pub fn new(values: ArrayD<f64>) -> RotationResult<Self> {
        Self::from_batch(Batch::new(values, Mask::none(), 2, 0)?)
    }

    /// A one-dimensional batch from row-major matrices.
    pub fn from_rows(matrices: &[[[f64; 3]; 3]]) -> Self {
        let data: Vec<f64> = matrices.iter().flatten().flatten().copied().collect();
        Self(Batch::assemble(
            ArrayD::from_shape_fn(IxDyn(&[matrices.len(), 3, 3]), |idx| {
                data[idx[0] * 9 + idx[1] * 3 + idx[2]]
            }),
            Mask::none(),
            2,
            0,
        ))
    }

    /// The identity matrix with an empty batch shape.
    pub fn identity() -> Self {
        Self(Batch::assemble(
            ndarray::Array2::eye(3).into_dyn(),
            Mask::none(),
            2,
            0,
        ))
    }

    /// A one-dimensional batch from nalgebra matrices.
    pub fn from_nalgebra(matrices: &[nalgebra::Matrix3<f64>]) -> Self {
        let rows: Vec<[[f64; 3]; 3]> = matrices
            .iter()
            .map(|m| std::array::from_fn(|i| std::array::from_fn(|j| m[(i, j)])))
            .collect();
        Self::from_rows(&rows)
    }

    /// One nalgebra matrix per batch element, in row-major batch order.
    pub fn to_nalgebra(&self) -> RotationResult<Vec<nalgebra::Matrix3<f64>>> {
        self.require_no_denom("Matrix3::to_nalgebra")?;
        let blocks = self.blocks()?;
        Ok((0..self.size())
            .map(|b| nalgebra::Matrix3::from_fn(|i, j| blocks[[b, i * 3 + j, 0]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_layout() {
        let m = Matrix3::from_rows(&[[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
        assert_eq!(m.shape(), &[1]);
        assert_eq!(m.values()[[0, 1, 2]], 6.0);
        assert_eq!(m.values()[[0, 2, 0]], 7.0);
    }

    #[test]
    fn test_nalgebra_round_trip() {
        let original = nalgebra::Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let m = Matrix3::from_nalgebra(&[original]);
        assert_eq!(m.to_nalgebra().unwrap(), vec![original]);
    }

    #[test]
    fn test_identity() {
        let m = Matrix3::identity();
        assert!(m.shape().is_empty());
        assert_eq!(m.to_nalgebra().unwrap()[0], nalgebra::Matrix3::identity());
    }
}
