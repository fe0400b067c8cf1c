//! Validity masks for batched values.
//!
//! A mask is either a single flag covering every batch element or a boolean
//! array with exactly the batch shape. `true` marks an element as invalid.

use crate::batch::broadcast_shape;
use crate::error::{RotationError, RotationResult};
use ndarray::{ArrayD, Axis, IxDyn, Zip};

/// Per-element invalidity flags of a batched value.
#[derive(Clone, Debug, PartialEq)]
pub enum Mask {
    /// One flag for the whole batch
    Scalar(bool),
    /// One flag per batch element
    Array(ArrayD<bool>),
}

impl Default for Mask {
    fn default() -> Self {
        Mask::Scalar(false)
    }
}

impl From<bool> for Mask {
    fn from(flag: bool) -> Self {
        Mask::Scalar(flag)
    }
}

impl From<ArrayD<bool>> for Mask {
    fn from(flags: ArrayD<bool>) -> Self {
        Mask::Array(flags).compact()
    }
}

impl Mask {
    /// Mask with no element flagged.
    pub fn none() -> Self {
        Mask::Scalar(false)
    }

    /// Mask with every element flagged.
    pub fn all() -> Self {
        Mask::Scalar(true)
    }

    /// True if at least one element is flagged.
    pub fn any(&self) -> bool {
        match self {
            Mask::Scalar(flag) => *flag,
            Mask::Array(flags) => flags.iter().any(|&f| f),
        }
    }

    /// True if every element is flagged.
    pub fn all_set(&self) -> bool {
        match self {
            Mask::Scalar(flag) => *flag,
            Mask::Array(flags) => flags.iter().all(|&f| f),
        }
    }

    /// Number of flagged elements within a batch of the given shape.
    pub fn count(&self, shape: &[usize]) -> usize {
        match self {
            Mask::Scalar(true) => shape.iter().product(),
            Mask::Scalar(false) => 0,
            Mask::Array(flags) => flags.iter().filter(|&&f| f).count(),
        }
    }

    /// Flag of a single batch element.
    pub fn is_masked(&self, index: &[usize]) -> bool {
        match self {
            Mask::Scalar(flag) => *flag,
            Mask::Array(flags) => flags.get(index).copied().unwrap_or(false),
        }
    }

    /// Check whether this mask can be broadcast to a batch shape.
    pub fn fits(&self, shape: &[usize]) -> bool {
        match self {
            Mask::Scalar(_) => true,
            Mask::Array(flags) => broadcast_shape(&[flags.shape(), shape])
                .map(|s| s.as_slice() == shape)
                .unwrap_or(false),
        }
    }

    /// Broadcast the mask to a batch shape.
    pub fn broadcast_to(&self, shape: &[usize]) -> RotationResult<Mask> {
        match self {
            Mask::Scalar(flag) => Ok(Mask::Scalar(*flag)),
            Mask::Array(flags) => {
                if flags.shape() == shape {
                    return Ok(self.clone());
                }
                let mut view = flags.view();
                while view.ndim() < shape.len() {
                    view.insert_axis_inplace(Axis(0));
                }
                let expanded = view.broadcast(IxDyn(shape)).ok_or_else(|| {
                    RotationError::BroadcastMismatch {
                        left: flags.shape().to_vec(),
                        right: shape.to_vec(),
                    }
                })?;
                Ok(Mask::Array(expanded.to_owned()))
            }
        }
    }

    /// Full boolean array with the batch shape.
    pub fn to_array(&self, shape: &[usize]) -> RotationResult<ArrayD<bool>> {
        match self.broadcast_to(shape)? {
            Mask::Scalar(flag) => Ok(ArrayD::from_elem(IxDyn(shape), flag)),
            Mask::Array(flags) => Ok(flags),
        }
    }

    /// Flags in row-major batch order.
    pub fn to_flat(&self, shape: &[usize]) -> RotationResult<Vec<bool>> {
        Ok(self.to_array(shape)?.iter().copied().collect())
    }

    /// Element-wise OR of two masks over a common batch shape.
    pub fn or(&self, other: &Mask, shape: &[usize]) -> RotationResult<Mask> {
        match (self, other) {
            (Mask::Scalar(a), Mask::Scalar(b)) => Ok(Mask::Scalar(*a || *b)),
            (Mask::Scalar(true), _) | (_, Mask::Scalar(true)) => Ok(Mask::Scalar(true)),
            (Mask::Scalar(false), other) | (other, Mask::Scalar(false)) => {
                other.broadcast_to(shape)
            }
            (Mask::Array(_), Mask::Array(b)) => {
                let mut merged = self.to_array(shape)?;
                let b = Mask::Array(b.clone()).to_array(shape)?;
                Zip::from(&mut merged)
                    .and(&b)
                    .for_each(|x, &y| *x = *x || y);
                Ok(Mask::Array(merged).compact())
            }
        }
    }

    /// OR the mask with flags given in row-major batch order.
    pub fn or_flat(&self, flags: &[bool], shape: &[usize]) -> RotationResult<Mask> {
        if !flags.iter().any(|&f| f) {
            return self.broadcast_to(shape);
        }
        let extra = ArrayD::from_shape_vec(IxDyn(shape), flags.to_vec())?;
        self.or(&Mask::Array(extra), shape)
    }

    /// Collapse an array mask with no flagged element into a scalar mask.
    pub fn compact(self) -> Mask {
        match self {
            Mask::Array(ref flags) if flags.iter().all(|&f| !f) => Mask::Scalar(false),
            other => other,
        }
    }
}
