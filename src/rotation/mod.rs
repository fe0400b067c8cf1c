//! Quaternion rotations over batches.
//!
//! [`Quaternion`] is the central type. Its operations are split by concern:
//! - `algebra`: Hamilton product, conjugate, reciprocal and division
//! - `matrix`: conversion to and from 3×3 rotation matrices
//! - `axis_angle`: rotation angle and axis
//! - `euler`: the 24 Euler axis sequences
//!
//! Every operation takes a `recursive` flag. When set, derivatives attached
//! to the inputs are carried through the operation by the chain rule.

pub mod algebra;
pub mod axis_angle;
pub mod euler;
pub mod matrix;
pub mod quaternion;

pub use algebra::Operand;
pub use euler::{EulerAxes, EulerEncoding};
pub use quaternion::{IDENTITY, MASKED, Quaternion, QuaternionSource, X_AXIS, Y_AXIS, Z_AXIS, ZERO};

/// Algorithm used to extract a quaternion from a rotation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixConversion {
    /// Closed form keyed by the largest diagonal entry. Numerically robust,
    /// but does not propagate derivatives.
    #[default]
    LargestDiagonal,
    /// Four square roots with signs taken from the antisymmetric part.
    /// Less accurate, but propagates derivatives.
    FourRoots,
}

/// Options for conversions into quaternions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    /// Carry derivatives of the input through the conversion.
    pub recursive: bool,
    pub matrix_conversion: MatrixConversion,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            matrix_conversion: MatrixConversion::default(),
        }
    }
}

impl ConversionConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_matrix_conversion(mut self, method: MatrixConversion) -> Self {
        self.matrix_conversion = method;
        self
    }
}
