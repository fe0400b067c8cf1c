//! The batched quaternion type.
//!
//! Components are ordered scalar first: `(w, x, y, z)`. A quaternion batch
//! has a trailing numerator axis of length 4, optionally followed by
//! denominator axes when the value itself is a Jacobian.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use rand::Rng;

use super::ConversionConfig;
use crate::batch::{Batch, Derivs, Mask, Matrix3, Scalar, Vector3, batch_wrapper, broadcast_shape};
use crate::error::{RotationError, RotationResult};

/// A batch of quaternions `(w, x, y, z)`.
#[derive(Clone, Debug)]
pub struct Quaternion(pub(crate) Batch);

batch_wrapper!(Quaternion, "Quaternion", [4], units = false);

/// The zero quaternion.
pub static ZERO: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([0.0, 0.0, 0.0, 0.0], false));

/// The pure quaternion along x.
pub static X_AXIS: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([0.0, 1.0, 0.0, 0.0], false));

/// The pure quaternion along y.
pub static Y_AXIS: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([0.0, 0.0, 1.0, 0.0], false));

/// The pure quaternion along z.
pub static Z_AXIS: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([0.0, 0.0, 0.0, 1.0], false));

/// The identity rotation.
pub static IDENTITY: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([1.0, 0.0, 0.0, 0.0], false));

/// The identity with every element masked.
pub static MASKED: LazyLock<Quaternion> =
    LazyLock::new(|| Quaternion::constant([1.0, 0.0, 0.0, 0.0], true));

/// Anything that can be coerced into a quaternion.
#[derive(Clone, Debug)]
pub enum QuaternionSource {
    Quaternion(Quaternion),
    /// A rotation matrix, converted through the configured matrix method.
    Matrix3(Matrix3),
    /// A 3-vector, embedded with a zero scalar part.
    Vector3(Vector3),
    /// A raw batch whose numerator, or whose last batch axis, has length 4.
    Batch(Batch),
}

impl From<Quaternion> for QuaternionSource {
    fn from(value: Quaternion) -> Self {
        Self::Quaternion(value)
    }
}

impl From<Matrix3> for QuaternionSource {
    fn from(value: Matrix3) -> Self {
        Self::Matrix3(value)
    }
}

impl From<Vector3> for QuaternionSource {
    fn from(value: Vector3) -> Self {
        Self::Vector3(value)
    }
}

impl From<Batch> for QuaternionSource {
    fn from(value: Batch) -> Self {
        Self::Batch(value)
    }
}

impl Quaternion {
    fn constant(components: [f64; 4], masked: bool) -> Self {
        Self(Batch::assemble(
            ndarray::arr1(&components).into_dyn(),
            Mask::from(masked),
            1,
            0,
        ))
        .as_readonly()
    }

    /// Create an unmasked batch from a buffer whose last axis has length 4.
    pub fn new(values: ArrayD<f64>) -> RotationResult<Self> {
        Self::with_mask_and_denominator(values, Mask::none(), 0)
    }

    /// Create a batch whose buffer ends in `drank` denominator axes.
    pub fn with_mask_and_denominator(
        values: ArrayD<f64>,
        mask: Mask,
        drank: usize,
    ) -> RotationResult<Self> {
        Self::from_batch(Batch::new(values, mask, 1, drank)?)
    }

    /// A single quaternion with an empty batch shape.
    pub fn from_wxyz(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self(Batch::assemble(
            ndarray::arr1(&[w, x, y, z]).into_dyn(),
            Mask::none(),
            1,
            0,
        ))
    }

    /// A one-dimensional batch from `[w, x, y, z]` rows.
    pub fn from_components(rows: &[[f64; 4]]) -> Self {
        Self(Batch::assemble(
            ndarray::Array2::from(rows.to_vec()).into_dyn(),
            Mask::none(),
            1,
            0,
        ))
    }

    /// `[w, x, y, z]` rows, one per batch element in row-major order.
    pub fn to_components(&self) -> RotationResult<Vec<[f64; 4]>> {
        self.require_no_denom("Quaternion::to_components")?;
        let values = self.values().to_shape((self.size(), 4))?;
        Ok(values
            .outer_iter()
            .map(|row| [row[0], row[1], row[2], row[3]])
            .collect())
    }

    /// A one-dimensional batch from nalgebra quaternions.
    pub fn from_nalgebra(quaternions: &[nalgebra::Quaternion<f64>]) -> Self {
        let rows: Vec<[f64; 4]> = quaternions.iter().map(|q| [q.w, q.i, q.j, q.k]).collect();
        Self::from_components(&rows)
    }

    pub fn to_nalgebra(&self) -> RotationResult<Vec<nalgebra::Quaternion<f64>>> {
        Ok(self
            .to_components()?
            .into_iter()
            .map(|[w, x, y, z]| nalgebra::Quaternion::new(w, x, y, z))
            .collect())
    }

    /// Random unit quaternions with a non-negative scalar part.
    pub fn random(shape: &[usize]) -> Self {
        Self::random_with(&mut rand::rng(), shape)
    }

    /// Random unit quaternions drawn from `rng`.
    ///
    /// Samples are drawn uniformly from the unit 4-ball by rejection and
    /// projected onto the sphere, which gives a uniform distribution of
    /// rotations.
    pub fn random_with<R: Rng + ?Sized>(rng: &mut R, shape: &[usize]) -> Self {
        let count: usize = shape.iter().product();
        let mut data = Vec::with_capacity(count * 4);

        for _ in 0..count {
            let (q, norm) = loop {
                let q: [f64; 4] = std::array::from_fn(|_| rng.random_range(-1.0..1.0));
                let norm = q.iter().map(|c| c * c).sum::<f64>().sqrt();
                if norm > 1e-3 && norm <= 1.0 {
                    break (q, norm);
                }
            };
            let sign = if q[0] < 0.0 { -1.0 } else { 1.0 };
            data.extend(q.iter().map(|c| sign * c / norm));
        }

        let mut dims = shape.to_vec();
        dims.push(4);
        let values = ArrayD::from_shape_fn(IxDyn(&dims), |idx| {
            let flat = idx
                .slice()
                .iter()
                .zip(&dims)
                .fold(0, |acc, (&i, &n)| acc * n + i);
            data[flat]
        });
        Self(Batch::assemble(values, Mask::none(), 1, 0))
    }

    /// Assemble quaternions from a scalar part and a vector part.
    ///
    /// Both parts are broadcast to a common batch shape and must share the
    /// same denominator. With `recursive`, the derivative under every key of
    /// either part is assembled the same way, with a zero partial standing in
    /// for a key that only one part carries.
    pub fn from_parts(scalar: &Scalar, vector: &Vector3, recursive: bool) -> RotationResult<Self> {
        if scalar.units().is_some() || vector.units().is_some() {
            return Err(RotationError::UnitsNotAllowed("Quaternion"));
        }
        if scalar.denom() != vector.denom() {
            return Err(RotationError::DenominatorMismatch {
                op: "Quaternion::from_parts",
                left: scalar.denom().to_vec(),
                right: vector.denom().to_vec(),
            });
        }

        let shape = broadcast_shape(&[scalar.shape(), vector.shape()])?;
        let s = scalar.as_batch().without_derivs().broadcast_to(&shape)?;
        let v = vector.as_batch().without_derivs().broadcast_to(&shape)?;

        let sb = s.blocks()?;
        let vb = v.blocks()?;
        let (nb, _, nd) = sb.dim();

        let mut data = vec![0.0; nb * 4 * nd];
        for b in 0..nb {
            for d in 0..nd {
                data[(b * 4) * nd + d] = sb[[b, 0, d]];
                for c in 0..3 {
                    data[(b * 4 + c + 1) * nd + d] = vb[[b, c, d]];
                }
            }
        }

        let mask = s.mask().or(v.mask(), &shape)?;
        let mut result = Batch::from_flat(&shape, Self::NUMER, s.denom(), data, mask)?;

        if recursive {
            let keys: BTreeSet<&String> = scalar.derivs().keys().chain(vector.derivs().keys()).collect();
            let mut derivs = Derivs::new();
            for key in keys {
                let (ds, dv) = match (scalar.deriv(key), vector.deriv(key)) {
                    (Some(ds), Some(dv)) => (ds, dv),
                    (Some(ds), None) => {
                        let dv = Vector3::zeros(ds.shape(), ds.denom());
                        (ds, dv)
                    }
                    (None, Some(dv)) => {
                        let ds = Scalar(Batch::zeros(dv.shape(), &[], dv.denom()));
                        (ds, dv)
                    }
                    (None, None) => continue,
                };
                derivs.insert(key.clone(), Self::from_parts(&ds, &dv, false)?.into_batch());
            }
            result.insert_derivs(derivs)?;
        }

        Ok(Self(result))
    }

    /// Pure quaternions `(0, v)`.
    pub fn from_vector_part(vector: &Vector3, recursive: bool) -> RotationResult<Self> {
        let zero = Scalar(Batch::zeros(&[], &[], vector.denom()));
        Self::from_parts(&zero, vector, recursive)
    }

    /// Split into the scalar part and the vector part.
    pub fn to_parts(&self, recursive: bool) -> RotationResult<(Scalar, Vector3)> {
        let scalar = Scalar(self.0.extract_numer(0, recursive)?);
        let vector = Vector3(self.0.slice_numer(1, 4, recursive)?);
        Ok((scalar, vector))
    }

    /// Coerce a value into a quaternion using the default configuration.
    pub fn as_quaternion(source: impl Into<QuaternionSource>, recursive: bool) -> RotationResult<Self> {
        Self::as_quaternion_with(source, &ConversionConfig::new().with_recursive(recursive))
    }

    /// Coerce a value into a quaternion.
    ///
    /// Matrices go through [`Quaternion::from_matrix3_with`], vectors become
    /// pure quaternions, and raw batches are reinterpreted as 4-component
    /// numerators.
    pub fn as_quaternion_with(
        source: impl Into<QuaternionSource>,
        config: &ConversionConfig,
    ) -> RotationResult<Self> {
        match source.into() {
            QuaternionSource::Quaternion(q) => Ok(if config.recursive { q } else { q.without_derivs() }),
            QuaternionSource::Matrix3(m) => Self::from_matrix3_with(&m, config),
            QuaternionSource::Vector3(v) => Self::from_vector_part(&v, config.recursive),
            QuaternionSource::Batch(batch) => {
                if batch.numer() == [3] {
                    return Self::from_vector_part(&Vector3::from_batch(batch)?, config.recursive);
                }
                let batch = reinterpret(batch)?;
                let q = Self::from_batch(batch)?;
                Ok(if config.recursive { q } else { q.without_derivs() })
            }
        }
    }

    /// The zero quaternion, read-only.
    pub fn zero() -> Self {
        ZERO.clone()
    }

    /// The identity with every element masked, read-only.
    pub fn masked() -> Self {
        MASKED.clone()
    }
}

/// View a raw batch as quaternions.
///
/// A batch with a numerator of length 4 is taken as is. A batch with no
/// numerator whose last batch axis has length 4 has that axis moved into
/// the numerator, and so does each of its derivatives.
fn reinterpret(batch: Batch) -> RotationResult<Batch> {
    if batch.numer() == Quaternion::NUMER {
        return Ok(batch);
    }
    if batch.drank() != 0 {
        return Err(numer_mismatch(&batch));
    }

    let mut folded = fold_last_axis(&batch)?;
    let derivs = batch
        .derivs()
        .iter()
        .map(|(key, deriv)| Ok((key.clone(), fold_last_axis(deriv)?)))
        .collect::<RotationResult<Derivs>>()?;
    folded.insert_derivs(derivs)?;
    Ok(folded)
}

/// Move the trailing batch axis of a numerator-free batch into a length-4
/// numerator. An element is masked if any of its components was.
fn fold_last_axis(batch: &Batch) -> RotationResult<Batch> {
    if batch.nrank() != 0 || batch.shape().last() != Some(&4) {
        return Err(numer_mismatch(batch));
    }

    let mask = match batch.mask() {
        Mask::Scalar(flag) => Mask::Scalar(*flag),
        Mask::Array(flags) => Mask::from(
            flags.map_axis(Axis(flags.ndim() - 1), |lane| lane.iter().any(|&f| f)),
        ),
    };
    Batch::new(batch.values().clone(), mask, 1, batch.drank())
}

fn numer_mismatch(batch: &Batch) -> RotationError {
    RotationError::NumeratorMismatch {
        op: "Quaternion::as_quaternion",
        expected: Quaternion::NUMER.to_vec(),
        actual: batch.numer().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Units;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const TOLERANCE: f64 = 1e-12;

    fn slope(values: &[f64]) -> Batch {
        Batch::new(
            ndarray::Array2::from_shape_vec((values.len(), 1), values.to_vec())
                .unwrap()
                .into_dyn(),
            Mask::none(),
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_constants_are_readonly() {
        let mut identity = IDENTITY.clone();
        assert!(identity.is_readonly());
        assert_eq!(identity.to_components().unwrap(), vec![[1.0, 0.0, 0.0, 0.0]]);

        let deriv = Quaternion::with_mask_and_denominator(
            ArrayD::zeros(IxDyn(&[4, 1])),
            Mask::none(),
            1,
        )
        .unwrap();
        assert!(matches!(
            identity.insert_deriv("t", deriv),
            Err(RotationError::ReadOnly)
        ));

        assert!(MASKED.mask().all_set());
        assert!(!X_AXIS.mask().any());
        assert_eq!(Z_AXIS.to_components().unwrap(), vec![[0.0, 0.0, 0.0, 1.0]]);
        assert_eq!(Quaternion::zero().values().sum(), 0.0);
    }

    #[test]
    fn test_from_parts_and_to_parts() {
        let s = Scalar::from_slice(&[1.0, 2.0]);
        let v = Vector3::from_xyz(3.0, 4.0, 5.0);
        let q = Quaternion::from_parts(&s, &v, false).unwrap();

        assert_eq!(q.shape(), &[2]);
        assert_eq!(
            q.to_components().unwrap(),
            vec![[1.0, 3.0, 4.0, 5.0], [2.0, 3.0, 4.0, 5.0]]
        );

        let (s2, v2) = q.to_parts(false).unwrap();
        assert_eq!(s2.values().as_slice().unwrap(), &[1.0, 2.0]);
        assert_eq!(v2.to_rows().unwrap()[1], [3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_from_parts_substitutes_missing_partials() {
        let mut s = Scalar::from_slice(&[1.0, 2.0]);
        s.insert_deriv("a", Scalar(slope(&[10.0, 20.0]))).unwrap();
        let mut v = Vector3::from_rows(&[[0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let dv = Batch::new(ArrayD::ones(IxDyn(&[2, 3, 1])), Mask::none(), 1, 1).unwrap();
        v.insert_deriv("b", Vector3(dv)).unwrap();

        let q = Quaternion::from_parts(&s, &v, true).unwrap();
        let da = q.deriv("a").unwrap();
        let db = q.deriv("b").unwrap();

        assert_eq!(da.values().shape(), &[2, 4, 1]);
        assert_eq!(da.values()[[1, 0, 0]], 20.0);
        assert_eq!(da.values()[[1, 2, 0]], 0.0);
        assert_eq!(db.values()[[0, 0, 0]], 0.0);
        assert_eq!(db.values()[[0, 3, 0]], 1.0);
    }

    #[test]
    fn test_from_parts_rejects_mismatched_denominators() {
        let s = Scalar(slope(&[1.0]));
        let v = Vector3::from_xyz(0.0, 0.0, 1.0);
        assert!(matches!(
            Quaternion::from_parts(&s, &v, false),
            Err(RotationError::DenominatorMismatch { .. })
        ));
    }

    #[test]
    fn test_from_parts_rejects_units() {
        let s = Scalar::from_value(1.0).with_units(Units::DEG);
        let v = Vector3::from_xyz(0.0, 0.0, 1.0);
        assert!(matches!(
            Quaternion::from_parts(&s, &v, false),
            Err(RotationError::UnitsNotAllowed(_))
        ));
    }

    #[test]
    fn test_from_parts_merges_masks() {
        let s = Scalar::from_slice(&[1.0, 2.0])
            .with_mask(Mask::from(ndarray::arr1(&[false, true]).into_dyn()))
            .unwrap();
        let v = Vector3::from_xyz(0.0, 0.0, 1.0);
        let q = Quaternion::from_parts(&s, &v, false).unwrap();
        assert!(!q.mask().is_masked(&[0]));
        assert!(q.mask().is_masked(&[1]));
    }

    #[test]
    fn test_from_vector_part() {
        let q = Quaternion::from_vector_part(&Vector3::from_xyz(1.0, 2.0, 3.0), false).unwrap();
        assert_eq!(q.to_components().unwrap(), vec![[0.0, 1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_as_quaternion_dispatch() {
        let q = Quaternion::from_wxyz(1.0, 0.0, 0.0, 0.0);
        assert_eq!(
            Quaternion::as_quaternion(q, true).unwrap().to_components().unwrap(),
            vec![[1.0, 0.0, 0.0, 0.0]]
        );

        let v = Vector3::from_xyz(1.0, 0.0, 0.0);
        assert_eq!(
            Quaternion::as_quaternion(v, true).unwrap().to_components().unwrap(),
            vec![[0.0, 1.0, 0.0, 0.0]]
        );

        let m = Matrix3::identity();
        let from_matrix = Quaternion::as_quaternion(m, false).unwrap();
        let c = from_matrix.to_components().unwrap()[0];
        assert!((c[0].abs() - 1.0).abs() < TOLERANCE);

        let raw = Batch::new(
            ndarray::arr2(&[[1.0, 2.0, 3.0, 4.0]]).into_dyn(),
            Mask::none(),
            0,
            0,
        )
        .unwrap();
        let q = Quaternion::as_quaternion(raw, true).unwrap();
        assert_eq!(q.shape(), &[1]);
        assert_eq!(q.numer(), &[4]);

        let bad = Batch::zeros(&[2], &[5], &[]);
        assert!(matches!(
            Quaternion::as_quaternion(bad, true),
            Err(RotationError::NumeratorMismatch { .. })
        ));
    }

    #[test]
    fn test_raw_batch_coercion_keeps_derivatives() {
        let mut raw = Batch::new(
            ndarray::arr2(&[[1.0, 2.0, 3.0, 4.0], [0.5, 0.5, 0.5, 0.5]]).into_dyn(),
            Mask::from(ndarray::arr2(&[[false, false, false, false], [false, true, false, false]]).into_dyn()),
            0,
            0,
        )
        .unwrap();
        let dt = Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[2, 4, 1]), vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0])
                .unwrap(),
            Mask::none(),
            0,
            1,
        )
        .unwrap();
        raw.insert_deriv("t", dt).unwrap();

        let q = Quaternion::as_quaternion(raw.clone(), true).unwrap();
        assert_eq!(q.shape(), &[2]);
        assert!(!q.mask().is_masked(&[0]));
        assert!(q.mask().is_masked(&[1]));

        let d = q.deriv("t").unwrap();
        assert_eq!(d.shape(), &[2]);
        assert_eq!(d.numer(), &[4]);
        assert_eq!(d.denom(), &[1]);
        assert_eq!(d.values()[[0, 0, 0]], 1.0);
        assert_eq!(d.values()[[1, 3, 0]], 2.0);

        let flat = Quaternion::as_quaternion(raw, false).unwrap();
        assert!(flat.derivs().is_empty());
    }

    #[test]
    fn test_random_is_unit_with_non_negative_scalar() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = Quaternion::random_with(&mut rng, &[3, 5]);
        assert_eq!(q.shape(), &[3, 5]);
        for c in q.to_components().unwrap() {
            let norm: f64 = c.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < TOLERANCE);
            assert!(c[0] >= 0.0);
        }
    }

    #[test]
    fn test_nalgebra_round_trip() {
        let original = nalgebra::Quaternion::new(0.5, -0.5, 0.5, 0.5);
        let q = Quaternion::from_nalgebra(&[original]);
        assert_eq!(q.to_components().unwrap(), vec![[0.5, -0.5, 0.5, 0.5]]);
        assert_eq!(q.to_nalgebra().unwrap(), vec![original]);
    }
}
