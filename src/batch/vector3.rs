//! Batched 3-vectors.

use crate::batch::{Batch, Mask, Scalar, batch_wrapper};
use crate::error::RotationResult;
use ndarray::ArrayD;

/// A batch of 3-vectors.
#[derive(Clone, Debug)]
pub struct Vector3(pub(crate) Batch);

batch_wrapper!(Vector3, "Vector3", [3], units = true);

impl Vector3 {
    /// Create an unmasked batch from a buffer whose last axis has length 3.
    pub fn new(values: ArrayD<f64>) -> RotationResult<Self> {
        Self::from_batch(Batch::new(values, Mask::none(), 1, 0)?)
    }

    /// A one-dimensional batch from xyz triples.
    pub fn from_rows(rows: &[[f64; 3]]) -> Self {
        Self(Batch::assemble(
            ndarray::Array2::from(rows.to_vec()).into_dyn(),
            Mask::none(),
            1,
            0,
        ))
    }

    /// A single vector with an empty batch shape.
    pub fn from_xyz(x: f64, y: f64, z: f64) -> Self {
        Self(Batch::assemble(
            ndarray::arr1(&[x, y, z]).into_dyn(),
            Mask::none(),
            1,
            0,
        ))
    }

    /// A one-dimensional batch from nalgebra vectors.
    pub fn from_nalgebra(vectors: &[nalgebra::Vector3<f64>]) -> Self {
        let rows: Vec<[f64; 3]> = vectors.iter().map(|v| [v.x, v.y, v.z]).collect();
        Self::from_rows(&rows)
    }

    /// The zero vector broadcast to a batch shape, with an optional denominator.
    pub fn zeros(shape: &[usize], denom: &[usize]) -> Self {
        Self(Batch::zeros(shape, Self::NUMER, denom))
    }

    /// Euclidean length of each vector.
    pub fn norm(&self, recursive: bool) -> RotationResult<Scalar> {
        Ok(Scalar(self.0.norm(recursive)?))
    }

    /// Multiply each vector by a batched scalar.
    pub fn scale(&self, factor: &Scalar, recursive: bool) -> RotationResult<Self> {
        Ok(Self(self.0.scale(&factor.0, recursive)?))
    }

    /// Divide each vector by a batched scalar; zero divisors are masked.
    pub fn divide(&self, divisor: &Scalar, recursive: bool) -> RotationResult<Self> {
        self.scale(&divisor.reciprocal(recursive)?, recursive)
    }

    /// Vectors scaled to unit length; zero-length vectors are masked.
    pub fn unit(&self, recursive: bool) -> RotationResult<Self> {
        self.divide(&self.norm(recursive)?, recursive)
    }

    /// Row-major xyz triples, one per batch element.
    pub fn to_rows(&self) -> RotationResult<Vec<[f64; 3]>> {
        self.require_no_denom("Vector3::to_rows")?;
        let values = self.values().to_shape((self.size(), 3))?;
        Ok(values
            .outer_iter()
            .map(|row| [row[0], row[1], row[2]])
            .collect())
    }
}
