//! Batched quaternion rotations with masks and exact first-order derivatives.
//!
//! Values are batches of arbitrary shape. Each element carries a validity
//! flag, and each value may carry derivatives with respect to named
//! parameters, which every operation propagates by the chain rule.
//!
//! ```
//! use apex_rotation::{EulerAxes, Quaternion, Scalar};
//!
//! let q = Quaternion::from_euler(
//!     &Scalar::from_value(1.0),
//!     &Scalar::from_value(2.0),
//!     &Scalar::from_value(3.0),
//!     EulerAxes::Ryxz,
//!     false,
//! )?;
//! let matrix = q.to_matrix3(false)?;
//! assert_eq!(matrix.numer(), &[3, 3]);
//! # Ok::<(), apex_rotation::RotationError>(())
//! ```

pub mod batch;
pub mod error;
pub mod logger;
pub mod rotation;

pub use batch::{Batch, Derivs, Mask, Matrix3, Scalar, Units, Vector3};
pub use error::{RotationError, RotationResult};
pub use logger::{init_logger, init_logger_with_level};
pub use rotation::{ConversionConfig, EulerAxes, MatrixConversion, Quaternion};
