//! The batched value container.
//!
//! A [`Batch`] stores a real-valued buffer laid out as
//! `batch shape ++ numerator shape ++ denominator shape`, a validity [`Mask`]
//! over the batch shape, optional [`Units`], and a map of named derivatives.
//!
//! A derivative stored under key `t` has the same batch and numerator shape
//! as its owner and exactly one more denominator axis, holding ∂(owner)/∂t.
//!
//! Results are always built the same way: validate and broadcast the operand
//! shapes, allocate one contiguous row-major buffer, fill it by explicit
//! (batch, numerator, denominator) index computation, then attach the
//! finished derivative map.

use crate::batch::{Derivs, Mask, Units, broadcast_shape, map_derivs, merge_derivs};
use crate::error::{RotationError, RotationResult};
use ndarray::{ArrayD, Axis, CowArray, Ix3, IxDyn, Slice, Zip};
use tracing::debug;

/// A batched numeric value with mask, denominator bookkeeping and derivatives.
#[derive(Clone, Debug)]
pub struct Batch {
    values: ArrayD<f64>,
    mask: Mask,
    nrank: usize,
    drank: usize,
    units: Option<Units>,
    derivs: Derivs,
    readonly: bool,
}

/// Concatenate batch, numerator and denominator shapes into a buffer shape.
pub(crate) fn full_shape(shape: &[usize], numer: &[usize], denom: &[usize]) -> Vec<usize> {
    let mut dims = Vec::with_capacity(shape.len() + numer.len() + denom.len());
    dims.extend_from_slice(shape);
    dims.extend_from_slice(numer);
    dims.extend_from_slice(denom);
    dims
}

impl Batch {
    /// Create a batch from a buffer, a mask and the numerator/denominator ranks.
    ///
    /// The trailing `nrank + drank` axes of `values` form the numerator and the
    /// denominator; the leading axes form the batch shape, to which the mask
    /// must broadcast.
    pub fn new(values: ArrayD<f64>, mask: Mask, nrank: usize, drank: usize) -> RotationResult<Self> {
        if values.ndim() < nrank + drank {
            return Err(RotationError::Array(format!(
                "buffer of rank {} cannot hold numerator rank {nrank} and denominator rank {drank}",
                values.ndim()
            )));
        }

        let rank = values.ndim() - nrank - drank;
        let shape = values.shape()[..rank].to_vec();
        if !mask.fits(&shape) {
            return Err(RotationError::BroadcastMismatch {
                left: match &mask {
                    Mask::Array(flags) => flags.shape().to_vec(),
                    Mask::Scalar(_) => Vec::new(),
                },
                right: shape,
            });
        }
        let mask = mask.broadcast_to(&shape)?;

        Ok(Self::assemble(values, mask, nrank, drank))
    }

    /// Build a batch whose shapes are consistent by construction.
    pub(crate) fn assemble(values: ArrayD<f64>, mask: Mask, nrank: usize, drank: usize) -> Self {
        Self {
            values,
            mask,
            nrank,
            drank,
            units: None,
            derivs: Derivs::new(),
            readonly: false,
        }
    }

    /// Build a batch from row-major data with explicit shapes.
    pub(crate) fn from_flat(
        shape: &[usize],
        numer: &[usize],
        denom: &[usize],
        data: Vec<f64>,
        mask: Mask,
    ) -> RotationResult<Self> {
        let values = ArrayD::from_shape_vec(IxDyn(&full_shape(shape, numer, denom)), data)?;
        Ok(Self::assemble(values, mask, numer.len(), denom.len()))
    }

    /// A zero-valued, unmasked batch.
    pub fn zeros(shape: &[usize], numer: &[usize], denom: &[usize]) -> Self {
        let values = ArrayD::zeros(IxDyn(&full_shape(shape, numer, denom)));
        Self::assemble(values, Mask::none(), numer.len(), denom.len())
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Number of numerator axes.
    pub fn nrank(&self) -> usize {
        self.nrank
    }

    /// Number of denominator axes.
    pub fn drank(&self) -> usize {
        self.drank
    }

    /// Number of batch axes.
    pub fn rank(&self) -> usize {
        self.values.ndim() - self.nrank - self.drank
    }

    /// The batch shape.
    pub fn shape(&self) -> &[usize] {
        &self.values.shape()[..self.rank()]
    }

    pub fn numer(&self) -> &[usize] {
        let start = self.rank();
        &self.values.shape()[start..start + self.nrank]
    }

    pub fn denom(&self) -> &[usize] {
        &self.values.shape()[self.values.ndim() - self.drank..]
    }

    /// Number of batch elements.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    fn numer_len(&self) -> usize {
        self.numer().iter().product()
    }

    fn denom_len(&self) -> usize {
        self.denom().iter().product()
    }

    pub fn units(&self) -> Option<&Units> {
        self.units.as_ref()
    }

    pub fn derivs(&self) -> &Derivs {
        &self.derivs
    }

    pub fn deriv(&self, key: &str) -> Option<&Batch> {
        self.derivs.get(key)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Replace the mask.
    pub fn with_mask(mut self, mask: Mask) -> RotationResult<Self> {
        if !mask.fits(self.shape()) {
            return Err(RotationError::BroadcastMismatch {
                left: Vec::new(),
                right: self.shape().to_vec(),
            });
        }
        self.mask = mask.broadcast_to(self.shape())?;
        Ok(self)
    }

    pub fn with_units(mut self, units: Option<Units>) -> Self {
        self.units = units;
        self
    }

    /// A copy of this value with its derivative map removed.
    pub fn without_derivs(&self) -> Self {
        Self {
            values: self.values.clone(),
            mask: self.mask.clone(),
            nrank: self.nrank,
            drank: self.drank,
            units: self.units,
            derivs: Derivs::new(),
            readonly: self.readonly,
        }
    }

    /// Mark this value as shared and immutable.
    pub fn as_readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Attach the derivative with respect to `key`.
    ///
    /// The derivative must share this value's numerator, carry exactly one
    /// more denominator axis, and broadcast to this value's batch shape. Any
    /// derivatives nested inside it are dropped.
    pub fn insert_deriv(&mut self, key: impl Into<String>, deriv: Batch) -> RotationResult<()> {
        let key = key.into();
        if self.readonly {
            return Err(RotationError::ReadOnly);
        }

        let invalid = |reason: String| RotationError::InvalidDerivative {
            key: key.clone(),
            reason,
        };

        if deriv.numer() != self.numer() {
            return Err(invalid(format!(
                "numerator {:?} does not match {:?}",
                deriv.numer(),
                self.numer()
            )));
        }
        if deriv.drank != self.drank + 1 {
            return Err(invalid(format!(
                "denominator rank {} is not {}",
                deriv.drank,
                self.drank + 1
            )));
        }
        if deriv.denom()[..self.drank] != *self.denom() {
            return Err(invalid(format!(
                "denominator {:?} does not extend {:?}",
                deriv.denom(),
                self.denom()
            )));
        }

        let deriv = if deriv.shape() == self.shape() {
            deriv
        } else {
            deriv
                .broadcast_to(self.shape())
                .map_err(|e| invalid(e.to_string()))?
        };

        self.derivs.insert(
            key,
            Batch {
                derivs: Derivs::new(),
                readonly: false,
                ..deriv
            },
        );
        Ok(())
    }

    /// Attach a finished derivative map.
    pub fn insert_derivs(&mut self, derivs: Derivs) -> RotationResult<()> {
        for (key, deriv) in derivs {
            self.insert_deriv(key, deriv)?;
        }
        Ok(())
    }

    /// Builder form of [`Batch::insert_derivs`].
    pub fn with_derivs(mut self, derivs: Derivs) -> RotationResult<Self> {
        self.insert_derivs(derivs)?;
        Ok(self)
    }

    /// View the buffer as (batch element, numerator, denominator).
    pub(crate) fn blocks(&self) -> RotationResult<CowArray<'_, f64, Ix3>> {
        Ok(self
            .values
            .to_shape((self.size(), self.numer_len(), self.denom_len()))?)
    }

    pub(crate) fn require_numer(&self, op: &'static str, expected: &[usize]) -> RotationResult<()> {
        if self.numer() != expected {
            return Err(RotationError::NumeratorMismatch {
                op,
                expected: expected.to_vec(),
                actual: self.numer().to_vec(),
            });
        }
        Ok(())
    }

    pub(crate) fn require_no_denom(&self, op: &'static str) -> RotationResult<()> {
        if self.drank > 0 {
            return Err(RotationError::DenominatorNotSupported {
                op,
                drank: self.drank,
            });
        }
        Ok(())
    }

    /// Broadcast this value, its mask and its derivatives to a batch shape.
    pub fn broadcast_to(&self, shape: &[usize]) -> RotationResult<Batch> {
        if self.shape() == shape {
            return Ok(self.clone());
        }

        let mismatch = || RotationError::BroadcastMismatch {
            left: self.shape().to_vec(),
            right: shape.to_vec(),
        };

        let rank = self.rank();
        if shape.len() < rank {
            return Err(mismatch());
        }

        let mut view = self.values.view();
        for _ in rank..shape.len() {
            view.insert_axis_inplace(Axis(0));
        }
        let target = full_shape(shape, self.numer(), self.denom());
        let values = view.broadcast(IxDyn(&target)).ok_or_else(mismatch)?.to_owned();

        Ok(Batch {
            values,
            mask: self.mask.broadcast_to(shape)?,
            nrank: self.nrank,
            drank: self.drank,
            units: self.units,
            derivs: map_derivs(&self.derivs, |d| d.broadcast_to(shape))?,
            readonly: false,
        })
    }

    /// Broadcast several values to their common batch shape.
    pub fn broadcast(items: &[&Batch]) -> RotationResult<Vec<Batch>> {
        let shapes: Vec<&[usize]> = items.iter().map(|b| b.shape()).collect();
        let shape = broadcast_shape(&shapes)?;
        items.iter().map(|b| b.broadcast_to(&shape)).collect()
    }

    /// Element-wise sum; numerators and denominators must match.
    pub fn add(&self, other: &Batch) -> RotationResult<Batch> {
        if self.numer() != other.numer() {
            return Err(RotationError::NumeratorMismatch {
                op: "add",
                expected: self.numer().to_vec(),
                actual: other.numer().to_vec(),
            });
        }
        if self.denom() != other.denom() {
            return Err(RotationError::DenominatorMismatch {
                op: "add",
                left: self.denom().to_vec(),
                right: other.denom().to_vec(),
            });
        }

        let shape = broadcast_shape(&[self.shape(), other.shape()])?;
        let a = self.broadcast_to(&shape)?;
        let b = other.broadcast_to(&shape)?;

        let values = &a.values + &b.values;
        let mask = a.mask.or(&b.mask, &shape)?;
        let derivs = merge_derivs(a.derivs, b.derivs)?;

        Ok(Batch {
            values,
            mask,
            nrank: a.nrank,
            drank: a.drank,
            units: a.units,
            derivs,
            readonly: false,
        })
    }

    /// Multiply every element by a constant.
    pub fn scale_const(&self, factor: f64) -> Batch {
        Batch {
            values: self.values.mapv(|v| v * factor),
            mask: self.mask.clone(),
            nrank: self.nrank,
            drank: self.drank,
            units: self.units,
            derivs: self
                .derivs
                .iter()
                .map(|(k, d)| (k.clone(), d.scale_const(factor)))
                .collect(),
            readonly: false,
        }
    }

    /// Multiply by a batched scalar, applying the product rule to derivatives.
    ///
    /// At most one operand may carry a denominator; the result's denominator
    /// is the concatenation of both.
    pub fn scale(&self, factor: &Batch, recursive: bool) -> RotationResult<Batch> {
        factor.require_numer("scale", &[])?;
        if self.drank > 0 && factor.drank > 0 {
            return Err(RotationError::DualDenominators {
                op: "scale",
                left: self.drank,
                right: factor.drank,
            });
        }

        let shape = broadcast_shape(&[self.shape(), factor.shape()])?;
        let x = self.without_derivs().broadcast_to(&shape)?;
        let s = factor.without_derivs().broadcast_to(&shape)?;

        let xb = x.blocks()?;
        let sb = s.blocks()?;
        let (nb, nn, nx) = xb.dim();
        let ns = sb.dim().2;

        let mut data = Vec::with_capacity(nb * nn * nx * ns);
        for b in 0..nb {
            for n in 0..nn {
                for i in 0..nx {
                    let xv = xb[[b, n, i]];
                    for j in 0..ns {
                        data.push(xv * sb[[b, 0, j]]);
                    }
                }
            }
        }

        let mut denom = x.denom().to_vec();
        denom.extend_from_slice(s.denom());
        let mask = x.mask.or(&s.mask, &shape)?;
        let mut result = Batch::from_flat(&shape, x.numer(), &denom, data, mask)?;
        result.units = self.units.or(factor.units);

        if recursive {
            let left = map_derivs(&self.derivs, |d| d.scale(&s, false))?;
            let right = map_derivs(&factor.derivs, |d| x.scale(d, false))?;
            result.derivs = merge_derivs(left, right)?;
        }

        Ok(result)
    }

    /// Element-wise reciprocal of a scalar batch.
    ///
    /// Zero-valued elements are masked and computed as 1 instead of faulting.
    pub fn reciprocal(&self, recursive: bool) -> RotationResult<Batch> {
        self.require_numer("reciprocal", &[])?;
        self.require_no_denom("reciprocal")?;

        let zeros: Vec<bool> = self.values.iter().map(|&v| v == 0.0).collect();
        let mask = self.mask.or_flat(&zeros, self.shape())?;
        let masked = zeros.iter().filter(|&&z| z).count();
        if masked > 0 {
            debug!("reciprocal: masked {masked} zero-valued elements");
        }

        let inverse = self.values.mapv(|v| if v == 0.0 { 1.0 } else { 1.0 / v });
        let mut result = Batch::assemble(inverse, mask, 0, 0);

        if recursive && !self.derivs.is_empty() {
            let slope = Batch::assemble(
                result.values.mapv(|v| -v * v),
                result.mask.clone(),
                0,
                0,
            );
            result.derivs = map_derivs(&self.derivs, |d| d.scale(&slope, false))?;
        }

        Ok(result)
    }

    /// Apply a scalar function element-wise, with its derivative `slope`.
    pub(crate) fn map_scalar<F, G>(
        &self,
        op: &'static str,
        f: F,
        slope: G,
        recursive: bool,
    ) -> RotationResult<Batch>
    where
        F: Fn(f64) -> f64,
        G: Fn(f64) -> f64,
    {
        self.require_numer(op, &[])?;
        self.require_no_denom(op)?;

        let mut result = Batch::assemble(self.values.mapv(&f), self.mask.clone(), 0, 0);
        if recursive && !self.derivs.is_empty() {
            let slope = Batch::assemble(self.values.mapv(&slope), self.mask.clone(), 0, 0);
            result.derivs = map_derivs(&self.derivs, |d| d.scale(&slope, false))?;
        }
        Ok(result)
    }

    /// Four-quadrant arctangent of `self / x` for scalar batches.
    pub(crate) fn atan2(&self, x: &Batch, recursive: bool) -> RotationResult<Batch> {
        self.require_numer("atan2", &[])?;
        x.require_numer("atan2", &[])?;
        self.require_no_denom("atan2")?;
        x.require_no_denom("atan2")?;

        let shape = broadcast_shape(&[self.shape(), x.shape()])?;
        let yb = self.without_derivs().broadcast_to(&shape)?;
        let xb = x.without_derivs().broadcast_to(&shape)?;

        let values = Zip::from(&yb.values)
            .and(&xb.values)
            .map_collect(|&y, &x| y.atan2(x));
        let mask = yb.mask.or(&xb.mask, &shape)?;
        let mut result = Batch::assemble(values, mask, 0, 0);

        if recursive && !(self.derivs.is_empty() && x.derivs.is_empty()) {
            let r_sq = Zip::from(&yb.values)
                .and(&xb.values)
                .map_collect(|&y, &x| x * x + y * y);
            let zeros: Vec<bool> = r_sq.iter().map(|&r| r == 0.0).collect();
            let slope_mask = result.mask.or_flat(&zeros, &shape)?;
            let r_sq = r_sq.mapv(|r| if r == 0.0 { 1.0 } else { r });

            let dy_slope = Batch::assemble(&xb.values / &r_sq, slope_mask.clone(), 0, 0);
            let dx_slope = Batch::assemble(-&yb.values / &r_sq, slope_mask, 0, 0);

            let left = map_derivs(&self.derivs, |d| d.scale(&dy_slope, false))?;
            let right = map_derivs(&x.derivs, |d| d.scale(&dx_slope, false))?;
            result.derivs = merge_derivs(left, right)?;
        }

        Ok(result)
    }

    /// Contract the single numerator axis of `self` with that of `deriv`,
    /// weighting each batch element by `weights`.
    fn numer_dot(&self, deriv: &Batch, weights: &[f64], mask: &Mask) -> RotationResult<Batch> {
        let vb = self.blocks()?;
        let db = deriv.blocks()?;
        let (nb, nn, np) = db.dim();

        let mut data = Vec::with_capacity(nb * np);
        for b in 0..nb {
            for p in 0..np {
                let sum: f64 = (0..nn).map(|n| vb[[b, n, 0]] * db[[b, n, p]]).sum();
                data.push(weights[b] * sum);
            }
        }

        let mask = mask.or(&deriv.mask, self.shape())?;
        Batch::from_flat(self.shape(), &[], deriv.denom(), data, mask)
    }

    /// Sum of squares over the numerator axis.
    pub(crate) fn norm_sq(&self, recursive: bool) -> RotationResult<Batch> {
        if self.nrank != 1 {
            return Err(RotationError::NumeratorMismatch {
                op: "norm_sq",
                expected: vec![self.numer_len()],
                actual: self.numer().to_vec(),
            });
        }
        self.require_no_denom("norm_sq")?;

        let vb = self.blocks()?;
        let (nb, nn, _) = vb.dim();
        let sums: Vec<f64> = (0..nb)
            .map(|b| (0..nn).map(|n| vb[[b, n, 0]] * vb[[b, n, 0]]).sum())
            .collect();

        let mut result = Batch::from_flat(self.shape(), &[], &[], sums, self.mask.clone())?;
        if recursive {
            let weights = vec![2.0; nb];
            result.derivs = map_derivs(&self.derivs, |d| self.numer_dot(d, &weights, &self.mask))?;
        }
        Ok(result)
    }

    /// Euclidean norm over the numerator axis.
    ///
    /// The value is exact at zero; only the derivative of a zero-length
    /// element is masked.
    pub(crate) fn norm(&self, recursive: bool) -> RotationResult<Batch> {
        let norm_sq = self.norm_sq(false)?;
        let norms = norm_sq.values.mapv(f64::sqrt);
        let mut result = Batch::assemble(norms, self.mask.clone(), 0, 0);

        if recursive && !self.derivs.is_empty() {
            let zeros: Vec<bool> = result.values.iter().map(|&n| n == 0.0).collect();
            let deriv_mask = self.mask.or_flat(&zeros, self.shape())?;
            let weights: Vec<f64> = result
                .values
                .iter()
                .map(|&n| if n == 0.0 { 1.0 } else { 1.0 / n })
                .collect();
            result.derivs = map_derivs(&self.derivs, |d| self.numer_dot(d, &weights, &deriv_mask))?;
        }
        Ok(result)
    }

    /// Extract one component of a single-axis numerator as a scalar batch.
    pub(crate) fn extract_numer(&self, index: usize, recursive: bool) -> RotationResult<Batch> {
        if self.nrank != 1 || index >= self.numer()[0] {
            return Err(RotationError::NumeratorMismatch {
                op: "extract_numer",
                expected: vec![index + 1],
                actual: self.numer().to_vec(),
            });
        }

        let values = self.values.index_axis(Axis(self.rank()), index).to_owned();
        let derivs = if recursive {
            map_derivs(&self.derivs, |d| d.extract_numer(index, false))?
        } else {
            Derivs::new()
        };

        Ok(Batch {
            values,
            mask: self.mask.clone(),
            nrank: 0,
            drank: self.drank,
            units: self.units,
            derivs,
            readonly: false,
        })
    }

    /// Slice a range of components out of a single-axis numerator.
    pub(crate) fn slice_numer(&self, start: usize, stop: usize, recursive: bool) -> RotationResult<Batch> {
        if self.nrank != 1 || start >= stop || stop > self.numer()[0] {
            return Err(RotationError::NumeratorMismatch {
                op: "slice_numer",
                expected: vec![stop - start.min(stop)],
                actual: self.numer().to_vec(),
            });
        }

        let values = self
            .values
            .slice_axis(Axis(self.rank()), Slice::from(start..stop))
            .to_owned();
        let derivs = if recursive {
            map_derivs(&self.derivs, |d| d.slice_numer(start, stop, false))?
        } else {
            Derivs::new()
        };

        Ok(Batch {
            values,
            mask: self.mask.clone(),
            nrank: 1,
            drank: self.drank,
            units: self.units,
            derivs,
            readonly: false,
        })
    }

    /// Chain rule: contract this Jacobian's denominator with `other`'s numerator.
    ///
    /// `self` holds ∂y/∂x (denominator = shape of x) and `other` holds ∂x/∂t;
    /// the result holds ∂y/∂t with `self`'s numerator and `other`'s
    /// denominator. Derivatives of either operand are not carried over.
    pub fn chain(&self, other: &Batch) -> RotationResult<Batch> {
        if self.drank == 0 || self.denom() != other.numer() {
            return Err(RotationError::DenominatorMismatch {
                op: "chain",
                left: self.denom().to_vec(),
                right: other.numer().to_vec(),
            });
        }

        let shape = broadcast_shape(&[self.shape(), other.shape()])?;
        let a = self.without_derivs().broadcast_to(&shape)?;
        let b = other.without_derivs().broadcast_to(&shape)?;

        let ab = a.blocks()?;
        let bb = b.blocks()?;
        let (nb, na, nk) = ab.dim();
        let nd = bb.dim().2;

        let mut data = vec![0.0; nb * na * nd];
        for e in 0..nb {
            for i in 0..na {
                for k in 0..nk {
                    let weight = ab[[e, i, k]];
                    if weight == 0.0 {
                        continue;
                    }
                    let row = (e * na + i) * nd;
                    for j in 0..nd {
                        data[row + j] += weight * bb[[e, k, j]];
                    }
                }
            }
        }

        let mask = a.mask.or(&b.mask, &shape)?;
        Batch::from_flat(&shape, a.numer(), b.denom(), data, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    const TOLERANCE: f64 = 1e-12;

    fn scalar(values: &[f64]) -> Batch {
        Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap(),
            Mask::none(),
            0,
            0,
        )
        .unwrap()
    }

    fn unit_deriv(len: usize) -> Batch {
        Batch::new(ArrayD::ones(IxDyn(&[len, 1])), Mask::none(), 0, 1).unwrap()
    }

    #[test]
    fn test_shapes_split_into_batch_numer_denom() {
        let b = Batch::zeros(&[2, 5], &[3, 3], &[4]);
        assert_eq!(b.shape(), &[2, 5]);
        assert_eq!(b.numer(), &[3, 3]);
        assert_eq!(b.denom(), &[4]);
        assert_eq!(b.size(), 10);
        assert_eq!(b.rank(), 2);
    }

    #[test]
    fn test_new_rejects_mask_of_wrong_shape() {
        let mask = Mask::Array(ArrayD::from_elem(IxDyn(&[3]), false));
        let result = Batch::new(ArrayD::zeros(IxDyn(&[2, 4])), mask, 1, 0);
        assert!(matches!(result, Err(RotationError::BroadcastMismatch { .. })));
    }

    #[test]
    fn test_insert_deriv_validates_rank() {
        let mut owner = scalar(&[1.0, 2.0]);
        let wrong = Batch::zeros(&[2], &[], &[]);
        assert!(matches!(
            owner.insert_deriv("t", wrong),
            Err(RotationError::InvalidDerivative { .. })
        ));
        assert!(owner.insert_deriv("t", unit_deriv(2)).is_ok());
        assert_eq!(owner.deriv("t").unwrap().drank(), 1);
    }

    #[test]
    fn test_insert_deriv_broadcasts_to_owner() {
        let mut owner = scalar(&[1.0, 2.0, 3.0]);
        owner
            .insert_deriv("t", Batch::zeros(&[], &[], &[2]))
            .unwrap();
        assert_eq!(owner.deriv("t").unwrap().shape(), &[3]);
    }

    #[test]
    fn test_readonly_rejects_insert() {
        let mut owner = scalar(&[1.0]).as_readonly();
        assert_eq!(
            owner.insert_deriv("t", unit_deriv(1)),
            Err(RotationError::ReadOnly)
        );
    }

    #[test]
    fn test_broadcast_to_leading_axes() {
        let b = Batch::zeros(&[3], &[4], &[]);
        let wide = b.broadcast_to(&[2, 3]).unwrap();
        assert_eq!(wide.values().shape(), &[2, 3, 4]);
        assert!(b.broadcast_to(&[2, 4]).is_err());
    }

    #[test]
    fn test_scale_product_rule() {
        let mut x = scalar(&[2.0, 3.0]);
        x.insert_deriv("t", unit_deriv(2)).unwrap();
        let mut s = scalar(&[5.0, 7.0]);
        s.insert_deriv("t", unit_deriv(2).scale_const(10.0)).unwrap();

        let product = x.scale(&s, true).unwrap();
        assert_eq!(product.values().as_slice().unwrap(), &[10.0, 21.0]);

        // d(xs)/dt = s + 10 x
        let d = product.deriv("t").unwrap();
        assert!((d.values()[[0, 0]] - 25.0).abs() < TOLERANCE);
        assert!((d.values()[[1, 0]] - 37.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_scale_rejects_dual_denominators() {
        let a = Batch::zeros(&[2], &[], &[1]);
        let b = Batch::zeros(&[2], &[], &[1]);
        assert!(matches!(
            a.scale(&b, false),
            Err(RotationError::DualDenominators { .. })
        ));
    }

    #[test]
    fn test_reciprocal_masks_zeros() {
        let r = scalar(&[2.0, 0.0, -4.0]).reciprocal(false).unwrap();
        assert_eq!(r.values().as_slice().unwrap(), &[0.5, 1.0, -0.25]);
        assert!(r.mask().is_masked(&[1]));
        assert!(!r.mask().is_masked(&[0]));
        assert!(r.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_reciprocal_derivative() {
        let mut x = scalar(&[2.0]);
        x.insert_deriv("t", unit_deriv(1)).unwrap();
        let r = x.reciprocal(true).unwrap();
        assert!((r.deriv("t").unwrap().values()[[0, 0]] + 0.25).abs() < TOLERANCE);
    }

    #[test]
    fn test_norm_and_derivative() {
        let mut v = Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![3.0, 4.0]).unwrap(),
            Mask::none(),
            1,
            0,
        )
        .unwrap();
        let dv = Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![1.0, 0.0]).unwrap(),
            Mask::none(),
            1,
            1,
        )
        .unwrap();
        v.insert_deriv("t", dv).unwrap();

        let n = v.norm(true).unwrap();
        assert!((n.values()[[0]] - 5.0).abs() < TOLERANCE);
        assert!((n.deriv("t").unwrap().values()[[0, 0]] - 0.6).abs() < TOLERANCE);

        let n_sq = v.norm_sq(true).unwrap();
        assert!((n_sq.values()[[0]] - 25.0).abs() < TOLERANCE);
        assert!((n_sq.deriv("t").unwrap().values()[[0, 0]] - 6.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_atan2_derivative() {
        let mut y = scalar(&[1.0]);
        y.insert_deriv("t", unit_deriv(1)).unwrap();
        let x = scalar(&[1.0]);

        let angle = y.atan2(&x, true).unwrap();
        assert!((angle.values()[[0]] - std::f64::consts::FRAC_PI_4).abs() < TOLERANCE);
        assert!((angle.deriv("t").unwrap().values()[[0, 0]] - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_extract_and_slice_numer() {
        let v = Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[2, 4]), (0..8).map(f64::from).collect()).unwrap(),
            Mask::none(),
            1,
            0,
        )
        .unwrap();

        let first = v.extract_numer(0, false).unwrap();
        assert_eq!(first.values().iter().copied().collect::<Vec<_>>(), vec![0.0, 4.0]);

        let tail = v.slice_numer(1, 4, false).unwrap();
        assert_eq!(tail.numer(), &[3]);
        assert_eq!(tail.values()[[1, 2]], 7.0);
        assert!(v.extract_numer(4, false).is_err());
    }

    #[test]
    fn test_chain_contracts_denominator() {
        // J = [[1, 2], [3, 4]] per element, dx/dt = [1, 1]
        let jac = Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[1, 2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            Mask::none(),
            1,
            1,
        )
        .unwrap();
        let dx = Batch::new(ArrayD::ones(IxDyn(&[1, 2, 1])), Mask::none(), 1, 1).unwrap();

        let chained = jac.chain(&dx).unwrap();
        assert_eq!(chained.values().shape(), &[1, 2, 1]);
        assert_eq!(chained.values()[[0, 0, 0]], 3.0);
        assert_eq!(chained.values()[[0, 1, 0]], 7.0);
    }

    #[test]
    fn test_add_merges_masks() {
        let a = scalar(&[1.0, 2.0]);
        let b = scalar(&[1.0, 1.0])
            .with_mask(Mask::Array(ndarray::arr1(&[false, true]).into_dyn()))
            .unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.values().as_slice().unwrap(), &[2.0, 3.0]);
        assert!(sum.mask().is_masked(&[1]));
    }
}
