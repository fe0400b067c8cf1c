//! Error types for the apex-rotation library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! Numeric degeneracies (zero-norm quaternions, zero-length axes, singular
//! matrix extraction) are never reported here. They are flagged through the
//! mask of the affected batch elements instead.

use ndarray::ShapeError;
use thiserror::Error;

/// Main result type used throughout the apex-rotation library
pub type RotationResult<T> = Result<T, RotationError>;

/// Main error type for the apex-rotation library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RotationError {
    /// Batch shapes cannot be broadcast together
    #[error("Incompatible batch shapes: {left:?} and {right:?}")]
    BroadcastMismatch {
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// Two operands carry denominators that do not line up
    #[error("{op}: denominators are incompatible: {left:?}, {right:?}")]
    DenominatorMismatch {
        op: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// Both operands carry a denominator
    #[error("{op}: dual denominators are not supported (ranks {left} and {right})")]
    DualDenominators {
        op: &'static str,
        left: usize,
        right: usize,
    },

    /// The operation requires a value without a denominator
    #[error("{op} does not support denominators (rank {drank})")]
    DenominatorNotSupported { op: &'static str, drank: usize },

    /// The numerator shape is not the one the operation expects
    #[error("{op}: numerator shape {actual:?} does not match {expected:?}")]
    NumeratorMismatch {
        op: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The derivative path of this operation is not available
    #[error("{op} does not implement derivatives")]
    DerivativesNotImplemented { op: &'static str },

    /// Units attached to a value type that never carries units
    #[error("Units are not allowed on {0}")]
    UnitsNotAllowed(&'static str),

    /// Units that are not an angle where an angle is required
    #[error("Units '{0}' are not an angle")]
    NotAnAngle(String),

    /// Unrecognized Euler axis sequence
    #[error("Unknown Euler axis sequence: {0}")]
    UnknownAxes(String),

    /// Attempt to modify a shared read-only value
    #[error("Cannot modify a read-only value")]
    ReadOnly,

    /// Derivative that does not fit its owner
    #[error("Invalid derivative '{key}': {reason}")]
    InvalidDerivative { key: String, reason: String },

    /// Array layout errors from the underlying buffer
    #[error("Array error: {0}")]
    Array(String),
}

impl From<ShapeError> for RotationError {
    fn from(err: ShapeError) -> Self {
        RotationError::Array(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_rotation_error_display() {
        let error = RotationError::DualDenominators {
            op: "multiply",
            left: 1,
            right: 1,
        };
        assert_eq!(
            error.to_string(),
            "multiply: dual denominators are not supported (ranks 1 and 1)"
        );
    }

    #[test]
    fn test_rotation_error_from_shape_error() {
        let err = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0; 3]).unwrap_err();
        let rotation_error = RotationError::from(err);

        match rotation_error {
            RotationError::Array(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected array error"),
        }
    }

    #[test]
    fn test_rotation_result_err() {
        let result: RotationResult<i32> = Err(RotationError::ReadOnly);
        assert!(result.is_err());
    }
}
