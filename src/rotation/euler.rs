//! Euler angle conversions for all 24 axis sequences.
//!
//! A sequence is named by a 4-character alias such as `"rzxz"`: `s` (static)
//! or `r` (rotating) frame, followed by the three rotation axes. The same
//! sequence is encoded as `(first axis, parity, repetition, frame)`.

use std::fmt;
use std::str::FromStr;

use super::quaternion::Quaternion;
use crate::batch::{Batch, Derivs, Mask, Matrix3, Scalar, broadcast_shape, map_derivs, merge_derivs};
use crate::error::{RotationError, RotationResult};

/// Axis following each axis in the cyclic order x, y, z, x.
const NEXT_AXIS: [usize; 4] = [1, 2, 0, 1];

/// Below this, the middle Euler angle is treated as degenerate (gimbal lock).
const GIMBAL_EPSILON: f64 = 4.0 * f64::EPSILON;

/// Numeric encoding of an Euler axis sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EulerEncoding {
    /// Index of the first axis, 0 to 2.
    pub first_axis: usize,
    /// 1 when the second axis follows the first in odd order.
    pub parity: usize,
    /// 1 when the first and last axes are the same.
    pub repetition: usize,
    /// 1 for rotating frames.
    pub frame: usize,
}

impl EulerEncoding {
    pub const fn new(first_axis: usize, parity: usize, repetition: usize, frame: usize) -> Self {
        Self {
            first_axis,
            parity,
            repetition,
            frame,
        }
    }

    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.first_axis, self.parity, self.repetition, self.frame)
    }
}

/// The 24 Euler axis sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EulerAxes {
    Sxyz,
    Sxyx,
    Sxzy,
    Sxzx,
    Syzx,
    Syzy,
    Syxz,
    Syxy,
    Szxy,
    Szxz,
    Szyx,
    Szyz,
    Rzyx,
    Rxyx,
    Ryzx,
    Rxzx,
    Rxzy,
    Ryzy,
    Rzxy,
    Ryxy,
    Ryxz,
    #[default]
    Rzxz,
    Rxyz,
    Rzyz,
}

/// Alias and encoding of each sequence, in declaration order.
#[rustfmt::skip]
const SEQUENCES: [(EulerAxes, &str, EulerEncoding); 24] = [
    (EulerAxes::Sxyz, "sxyz", EulerEncoding::new(0, 0, 0, 0)),
    (EulerAxes::Sxyx, "sxyx", EulerEncoding::new(0, 0, 1, 0)),
    (EulerAxes::Sxzy, "sxzy", EulerEncoding::new(0, 1, 0, 0)),
    (EulerAxes::Sxzx, "sxzx", EulerEncoding::new(0, 1, 1, 0)),
    (EulerAxes::Syzx, "syzx", EulerEncoding::new(1, 0, 0, 0)),
    (EulerAxes::Syzy, "syzy", EulerEncoding::new(1, 0, 1, 0)),
    (EulerAxes::Syxz, "syxz", EulerEncoding::new(1, 1, 0, 0)),
    (EulerAxes::Syxy, "syxy", EulerEncoding::new(1, 1, 1, 0)),
    (EulerAxes::Szxy, "szxy", EulerEncoding::new(2, 0, 0, 0)),
    (EulerAxes::Szxz, "szxz", EulerEncoding::new(2, 0, 1, 0)),
    (EulerAxes::Szyx, "szyx", EulerEncoding::new(2, 1, 0, 0)),
    (EulerAxes::Szyz, "szyz", EulerEncoding::new(2, 1, 1, 0)),
    (EulerAxes::Rzyx, "rzyx", EulerEncoding::new(0, 0, 0, 1)),
    (EulerAxes::Rxyx, "rxyx", EulerEncoding::new(0, 0, 1, 1)),
    (EulerAxes::Ryzx, "ryzx", EulerEncoding::new(0, 1, 0, 1)),
    (EulerAxes::Rxzx, "rxzx", EulerEncoding::new(0, 1, 1, 1)),
    (EulerAxes::Rxzy, "rxzy", EulerEncoding::new(1, 0, 0, 1)),
    (EulerAxes::Ryzy, "ryzy", EulerEncoding::new(1, 0, 1, 1)),
    (EulerAxes::Rzxy, "rzxy", EulerEncoding::new(1, 1, 0, 1)),
    (EulerAxes::Ryxy, "ryxy", EulerEncoding::new(1, 1, 1, 1)),
    (EulerAxes::Ryxz, "ryxz", EulerEncoding::new(2, 0, 0, 1)),
    (EulerAxes::Rzxz, "rzxz", EulerEncoding::new(2, 0, 1, 1)),
    (EulerAxes::Rxyz, "rxyz", EulerEncoding::new(2, 1, 0, 1)),
    (EulerAxes::Rzyz, "rzyz", EulerEncoding::new(2, 1, 1, 1)),
];

impl EulerAxes {
    /// Every sequence, in declaration order.
    pub const ALL: [EulerAxes; 24] = {
        let mut all = [EulerAxes::Sxyz; 24];
        let mut n = 0;
        while n < 24 {
            all[n] = SEQUENCES[n].0;
            n += 1;
        }
        all
    };

    pub fn encoding(self) -> EulerEncoding {
        SEQUENCES[self as usize].2
    }

    /// The 4-character lowercase alias, e.g. `"rzxz"`.
    pub fn alias(self) -> &'static str {
        SEQUENCES[self as usize].1
    }

    /// Look up a sequence by its encoding.
    pub fn from_encoding(encoding: EulerEncoding) -> RotationResult<Self> {
        SEQUENCES
            .iter()
            .find(|(_, _, e)| *e == encoding)
            .map(|(axes, _, _)| *axes)
            .ok_or_else(|| RotationError::UnknownAxes(format!("{:?}", encoding.as_tuple())))
    }
}

impl FromStr for EulerAxes {
    type Err = RotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        SEQUENCES
            .iter()
            .find(|(_, alias, _)| *alias == lower)
            .map(|(axes, _, _)| *axes)
            .ok_or_else(|| RotationError::UnknownAxes(s.to_string()))
    }
}

impl TryFrom<(usize, usize, usize, usize)> for EulerAxes {
    type Error = RotationError;

    fn try_from(value: (usize, usize, usize, usize)) -> Result<Self, Self::Error> {
        Self::from_encoding(EulerEncoding::new(value.0, value.1, value.2, value.3))
    }
}

impl fmt::Display for EulerAxes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

/// Convert three angle inputs to radians and broadcast them.
///
/// Returns the common batch shape, the flat angle values per input, and the
/// OR of the three masks.
fn prepare_angles(
    op: &'static str,
    angles: [&Scalar; 3],
) -> RotationResult<([Scalar; 3], Vec<usize>, [Vec<f64>; 3], Mask)> {
    let radians = [
        angles[0].to_radians()?,
        angles[1].to_radians()?,
        angles[2].to_radians()?,
    ];
    for angle in &radians {
        angle.require_no_denom(op)?;
    }

    let shape = broadcast_shape(&[radians[0].shape(), radians[1].shape(), radians[2].shape()])?;
    let mut mask = Mask::none();
    let mut flat: [Vec<f64>; 3] = Default::default();
    for (n, angle) in radians.iter().enumerate() {
        let bare = angle.as_batch().without_derivs().broadcast_to(&shape)?;
        mask = mask.or(bare.mask(), &shape)?;
        flat[n] = bare.values().iter().copied().collect();
    }

    Ok((radians, shape, flat, mask))
}

/// The four closed-form components `(w, i, j, k)` from the cosines and sines
/// of the three half angles.
///
/// Every term holds exactly one factor from each angle, so replacing one
/// `(cos, sin)` pair by `(-sin, cos)` yields the partial w.r.t. that angle.
fn half_angle_form(trig: [(f64, f64); 3], repetition: bool) -> [f64; 4] {
    let [(ci, si), (cj, sj), (ck, sk)] = trig;
    let (cc, cs, sc, ss) = (ci * ck, ci * sk, si * ck, si * sk);
    if repetition {
        [cj * (cc - ss), cj * (cs + sc), sj * (cc + ss), sj * (cs - sc)]
    } else {
        [
            cj * cc + sj * ss,
            cj * sc - sj * cs,
            cj * ss + sj * cc,
            cj * cs - sj * sc,
        ]
    }
}

/// Quaternion of one Euler triple, with its partials w.r.t. `(ai, aj, ak)`.
/// Sign that makes the scalar part non-negative. A scalar part of exactly
/// zero keeps the quaternion as is.
fn scalar_sign(w: f64) -> f64 {
    if w < 0.0 { -1.0 } else { 1.0 }
}

fn euler_quaternion(angles: [f64; 3], encoding: EulerEncoding) -> ([f64; 4], [[f64; 4]; 3]) {
    let parity = encoding.parity == 1;
    let frame = encoding.frame == 1;
    let i = encoding.first_axis + 1;
    let j = NEXT_AXIS[i + encoding.parity - 1] + 1;
    let k = NEXT_AXIS[i - encoding.parity] + 1;

    let (mut a, mut b, mut c) = (angles[0], angles[1], angles[2]);
    if frame {
        std::mem::swap(&mut a, &mut c);
    }
    if parity {
        b = -b;
    }

    let trig = [a, b, c].map(|angle| ((angle / 2.0).cos(), (angle / 2.0).sin()));
    let repetition = encoding.repetition == 1;

    let place = |form: [f64; 4]| {
        let mut q = [0.0; 4];
        q[0] = form[0];
        q[i] = form[1];
        q[j] = form[2];
        q[k] = form[3];
        if parity {
            q[j] = -q[j];
        }
        q
    };

    let q = place(half_angle_form(trig, repetition));
    let sign = scalar_sign(q[0]);

    let mut slots = [[0.0; 4]; 3];
    for (slot, partial) in slots.iter_mut().enumerate() {
        let mut shifted = trig;
        let (cos, sin) = trig[slot];
        shifted[slot] = (-sin, cos);
        let form = half_angle_form(shifted, repetition);
        *partial = place(form).map(|v| 0.5 * sign * v);
    }

    let (da, mut db, dc) = (slots[0], slots[1], slots[2]);
    if parity {
        db = db.map(|v| -v);
    }
    let partials = if frame { [dc, db, da] } else { [da, db, dc] };

    (q.map(|v| sign * v), partials)
}

/// Rotation matrix of one Euler triple.
fn euler_matrix(angles: [f64; 3], encoding: EulerEncoding) -> [[f64; 3]; 3] {
    let i = encoding.first_axis;
    let j = NEXT_AXIS[i + encoding.parity];
    let k = NEXT_AXIS[i + 1 - encoding.parity];

    let (mut a, mut b, mut c) = (angles[0], angles[1], angles[2]);
    if encoding.frame == 1 {
        std::mem::swap(&mut a, &mut c);
    }
    if encoding.parity == 1 {
        (a, b, c) = (-a, -b, -c);
    }

    let (si, sj, sk) = (a.sin(), b.sin(), c.sin());
    let (ci, cj, ck) = (a.cos(), b.cos(), c.cos());
    let (cc, cs, sc, ss) = (ci * ck, ci * sk, si * ck, si * sk);

    let mut m = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    if encoding.repetition == 1 {
        m[i][i] = cj;
        m[i][j] = sj * si;
        m[i][k] = sj * ci;
        m[j][i] = sj * sk;
        m[j][j] = -cj * ss + cc;
        m[j][k] = -cj * cs - sc;
        m[k][i] = -sj * ck;
        m[k][j] = cj * sc + cs;
        m[k][k] = cj * cc - ss;
    } else {
        m[i][i] = cj * ck;
        m[i][j] = sj * sc - cs;
        m[i][k] = sj * cc + ss;
        m[j][i] = cj * sk;
        m[j][j] = sj * ss + cc;
        m[j][k] = sj * cs - sc;
        m[k][i] = -sj;
        m[k][j] = cj * si;
        m[k][k] = cj * ci;
    }
    m
}

/// Euler triple of one rotation matrix.
///
/// At gimbal lock the last angle is set to zero and the first absorbs the
/// whole rotation about the shared axis.
fn matrix_euler(m: impl Fn(usize, usize) -> f64, encoding: EulerEncoding) -> [f64; 3] {
    let i = encoding.first_axis;
    let j = NEXT_AXIS[i + encoding.parity];
    let k = NEXT_AXIS[i + 1 - encoding.parity];

    let [mut ax, mut ay, mut az] = if encoding.repetition == 1 {
        let sy = m(i, j).hypot(m(i, k));
        if sy > GIMBAL_EPSILON {
            [m(i, j).atan2(m(i, k)), sy.atan2(m(i, i)), m(j, i).atan2(-m(k, i))]
        } else {
            [(-m(j, k)).atan2(m(j, j)), sy.atan2(m(i, i)), 0.0]
        }
    } else {
        let cy = m(i, i).hypot(m(j, i));
        if cy > GIMBAL_EPSILON {
            [m(k, j).atan2(m(k, k)), (-m(k, i)).atan2(cy), m(j, i).atan2(m(i, i))]
        } else {
            [(-m(j, k)).atan2(m(j, j)), (-m(k, i)).atan2(cy), 0.0]
        }
    };

    if encoding.parity == 1 {
        (ax, ay, az) = (-ax, -ay, -az);
    }
    if encoding.frame == 1 {
        std::mem::swap(&mut ax, &mut az);
    }
    [ax, ay, az]
}

impl Quaternion {
    /// Quaternions of Euler triples `(ai, aj, ak)` in the given sequence.
    ///
    /// Angles must be unitless or carry angle units. The result always has a
    /// non-negative scalar part. With `recursive`, derivatives of the angles
    /// are carried through the closed form.
    pub fn from_euler(
        ai: &Scalar,
        aj: &Scalar,
        ak: &Scalar,
        axes: EulerAxes,
        recursive: bool,
    ) -> RotationResult<Self> {
        let (radians, shape, flat, mask) = prepare_angles("Quaternion::from_euler", [ai, aj, ak])?;
        let count: usize = shape.iter().product();
        let encoding = axes.encoding();
        let with_derivs = recursive && radians.iter().any(|a| !a.derivs().is_empty());

        let mut data = Vec::with_capacity(count * 4);
        let mut jacobians: [Vec<f64>; 3] = Default::default();
        for e in 0..count {
            let (q, partials) = euler_quaternion([flat[0][e], flat[1][e], flat[2][e]], encoding);
            data.extend_from_slice(&q);
            if with_derivs {
                for (jacobian, partial) in jacobians.iter_mut().zip(partials.iter()) {
                    jacobian.extend_from_slice(partial);
                }
            }
        }

        let mut result = Batch::from_flat(&shape, Self::NUMER, &[], data, mask.clone())?;

        if with_derivs {
            let mut derivs = Derivs::new();
            for (angle, jacobian) in radians.iter().zip(jacobians) {
                if angle.derivs().is_empty() {
                    continue;
                }
                let slope = Batch::from_flat(&shape, Self::NUMER, &[], jacobian, mask.clone())?;
                let terms = map_derivs(angle.derivs(), |d| slope.scale(d, false))?;
                derivs = merge_derivs(derivs, terms)?;
            }
            result.insert_derivs(derivs)?;
        }

        Ok(Self(result))
    }

    /// Same rotation as [`Quaternion::from_euler`], computed through the
    /// rotation matrix. Derivatives are not carried. The sign of the result
    /// is not normalized.
    pub fn from_euler_via_matrix(
        ai: &Scalar,
        aj: &Scalar,
        ak: &Scalar,
        axes: EulerAxes,
    ) -> RotationResult<Self> {
        let matrix = Matrix3::from_euler(ai, aj, ak, axes)?;
        Self::from_matrix3(&matrix, false)
    }

    /// Euler angles in radians for the given sequence.
    pub fn to_euler(&self, axes: EulerAxes) -> RotationResult<(Scalar, Scalar, Scalar)> {
        self.to_matrix3(false)?.to_euler(axes)
    }
}

impl Matrix3 {
    /// Rotation matrices of Euler triples `(ai, aj, ak)`. Derivatives are
    /// not carried.
    pub fn from_euler(ai: &Scalar, aj: &Scalar, ak: &Scalar, axes: EulerAxes) -> RotationResult<Self> {
        let (_, shape, flat, mask) = prepare_angles("Matrix3::from_euler", [ai, aj, ak])?;
        let count: usize = shape.iter().product();
        let encoding = axes.encoding();

        let mut data = Vec::with_capacity(count * 9);
        for e in 0..count {
            let m = euler_matrix([flat[0][e], flat[1][e], flat[2][e]], encoding);
            data.extend(m.iter().flatten());
        }

        Ok(Self(Batch::from_flat(&shape, Self::NUMER, &[], data, mask)?))
    }

    /// Euler angles in radians for the given sequence.
    pub fn to_euler(&self, axes: EulerAxes) -> RotationResult<(Scalar, Scalar, Scalar)> {
        self.require_no_denom("Matrix3::to_euler")?;
        let shape = self.shape().to_vec();
        let blocks = self.blocks()?;
        let encoding = axes.encoding();

        let mut angles: [Vec<f64>; 3] = Default::default();
        for e in 0..blocks.dim().0 {
            let triple = matrix_euler(|i, j| blocks[[e, i * 3 + j, 0]], encoding);
            for (values, angle) in angles.iter_mut().zip(triple) {
                values.push(angle);
            }
        }

        let [ax, ay, az] = angles;
        let wrap = |values: Vec<f64>| -> RotationResult<Scalar> {
            Ok(Scalar(Batch::from_flat(&shape, &[], &[], values, self.mask().clone())?))
        };
        Ok((wrap(ax)?, wrap(ay)?, wrap(az)?))
    }
}
