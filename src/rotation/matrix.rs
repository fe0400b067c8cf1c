//! Conversions between quaternions and 3×3 rotation matrices.
//!
//! Quaternion to matrix uses the Wikipedia "Rotation matrix#Quaternion" form
//! on `√2·q/|q|`, which makes every entry a plain quadratic. Its Jacobian is
//! assembled analytically and then composed with the Jacobian of the
//! normalization step.
//!
//! Matrix to quaternion has two algorithms, selected by [`MatrixConversion`]:
//! the largest-diagonal closed form, and a four-square-root form that is
//! less accurate but differentiable.

use std::f64::consts::SQRT_2;

use nalgebra::{Matrix4, SMatrix};
use tracing::{debug, warn};

use super::quaternion::Quaternion;
use super::{ConversionConfig, MatrixConversion};
use crate::batch::{Batch, Matrix3, map_derivs};
use crate::error::{RotationError, RotationResult};

/// Jacobian of the flattened rotation matrix w.r.t. the raw components.
type MatrixJacobian = SMatrix<f64, 9, 4>;

/// Sparse entries `(row, column, component, coefficient)` of ∂M/∂q, where
/// the coefficient multiplies the scaled component named by `Term`.
#[derive(Clone, Copy)]
enum Term {
    S,
    X,
    Y,
    Z,
}

#[rustfmt::skip]
const DM_DQ_PATTERN: [(usize, usize, usize, f64, Term); 30] = [
    (1, 1, 1, -2.0, Term::X), (2, 2, 1, -2.0, Term::X),
    (0, 0, 2, -2.0, Term::Y), (2, 2, 2, -2.0, Term::Y),
    (0, 0, 3, -2.0, Term::Z), (1, 1, 3, -2.0, Term::Z),
    (0, 1, 3, -1.0, Term::S), (1, 2, 1, -1.0, Term::S), (2, 0, 2, -1.0, Term::S),
    (0, 2, 2,  1.0, Term::S), (1, 0, 3,  1.0, Term::S), (2, 1, 1,  1.0, Term::S),
    (1, 2, 0, -1.0, Term::X),
    (0, 1, 2,  1.0, Term::X), (0, 2, 3,  1.0, Term::X), (1, 0, 2,  1.0, Term::X),
    (2, 0, 3,  1.0, Term::X), (2, 1, 0,  1.0, Term::X),
    (2, 0, 0, -1.0, Term::Y),
    (0, 1, 1,  1.0, Term::Y), (0, 2, 0,  1.0, Term::Y), (1, 0, 1,  1.0, Term::Y),
    (1, 2, 3,  1.0, Term::Y), (2, 1, 3,  1.0, Term::Y),
    (0, 1, 0, -1.0, Term::Z),
    (0, 2, 1,  1.0, Term::Z), (1, 0, 0,  1.0, Term::Z), (1, 2, 2,  1.0, Term::Z),
    (2, 0, 1,  1.0, Term::Z), (2, 1, 2,  1.0, Term::Z),
];

/// ∂M/∂p for one raw quaternion `p` with norm `norm`.
///
/// Composes ∂M/∂q at `q = √2·p/|p|` with ∂q/∂p. The latter is
/// `(p·pᵀ - |p|²·I)·(-√2/|p|³)` written so that its diagonal only sums the
/// other three squared components.
fn rotation_jacobian(p: [f64; 4], norm: f64) -> MatrixJacobian {
    let f = SQRT_2 / norm;
    let q = [f * p[0], f * p[1], f * p[2], f * p[3]];

    let mut dm_dq = MatrixJacobian::zeros();
    for &(row, col, component, coefficient, term) in DM_DQ_PATTERN.iter() {
        let value = match term {
            Term::S => q[0],
            Term::X => q[1],
            Term::Y => q[2],
            Term::Z => q[3],
        };
        dm_dq[(row * 3 + col, component)] = coefficient * value;
    }

    let mut dq_dp = Matrix4::<f64>::zeros();
    for i in 0..4 {
        dq_dp[(i, i)] = -(0..4).filter(|&t| t != i).map(|t| p[t] * p[t]).sum::<f64>();
        for j in (i + 1)..4 {
            dq_dp[(i, j)] = p[i] * p[j];
            dq_dp[(j, i)] = p[i] * p[j];
        }
    }

    dm_dq * dq_dp * (-SQRT_2 / norm.powi(3))
}

/// Sign with `sign(0) = 0`.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Quaternion {
    /// Rotation matrices of these quaternions.
    ///
    /// Quaternions need not be normalized. Zero quaternions are masked and
    /// converted as if their norm were 1.
    pub fn to_matrix3(&self, recursive: bool) -> RotationResult<Matrix3> {
        Ok(self.matrix_and_jacobian(recursive, false)?.0)
    }

    /// Rotation matrices together with ∂M/∂q, the 3×3×4 Jacobian of each
    /// matrix w.r.t. the raw quaternion components.
    pub fn to_matrix3_with_partials(&self, recursive: bool) -> RotationResult<(Matrix3, Matrix3)> {
        let (matrix, jacobian) = self.matrix_and_jacobian(recursive, true)?;
        match jacobian {
            Some(jacobian) => Ok((matrix, jacobian)),
            None => Err(RotationError::DerivativesNotImplemented {
                op: "Quaternion::to_matrix3_with_partials",
            }),
        }
    }

    fn matrix_and_jacobian(
        &self,
        recursive: bool,
        partials: bool,
    ) -> RotationResult<(Matrix3, Option<Matrix3>)> {
        self.require_no_denom("Quaternion::to_matrix3")?;

        let shape = self.shape().to_vec();
        let blocks = self.blocks()?;
        let nb = blocks.dim().0;
        let need_jacobian = partials || (recursive && !self.derivs().is_empty());

        let mut zero_norms = vec![false; nb];
        let mut data = Vec::with_capacity(nb * 9);
        let mut jacobians = Vec::with_capacity(if need_jacobian { nb * 36 } else { 0 });

        for e in 0..nb {
            let p = [
                blocks[[e, 0, 0]],
                blocks[[e, 1, 0]],
                blocks[[e, 2, 0]],
                blocks[[e, 3, 0]],
            ];
            let mut norm = p.iter().map(|c| c * c).sum::<f64>().sqrt();
            if norm == 0.0 {
                zero_norms[e] = true;
                norm = 1.0;
            }

            let f = SQRT_2 / norm;
            let (s, x, y, z) = (f * p[0], f * p[1], f * p[2], f * p[3]);
            data.extend_from_slice(&[
                1.0 - (y * y + z * z),
                x * y - s * z,
                x * z + s * y,
                x * y + s * z,
                1.0 - (x * x + z * z),
                y * z - s * x,
                x * z - s * y,
                y * z + s * x,
                1.0 - (x * x + y * y),
            ]);

            if need_jacobian {
                let dm_dp = rotation_jacobian(p, norm);
                for row in 0..9 {
                    for component in 0..4 {
                        jacobians.push(dm_dp[(row, component)]);
                    }
                }
            }
        }

        let masked = zero_norms.iter().filter(|&&z| z).count();
        if masked > 0 {
            debug!("to_matrix3: masked {masked} zero-norm quaternions");
        }
        let mask = self.mask().or_flat(&zero_norms, &shape)?;
        let mut matrix = Batch::from_flat(&shape, Matrix3::NUMER, &[], data, mask.clone())?;

        let mut partial_matrix = None;
        if need_jacobian {
            let dm_dp = Batch::from_flat(&shape, Matrix3::NUMER, Self::NUMER, jacobians, mask)?;
            if recursive {
                matrix.insert_derivs(map_derivs(self.derivs(), |d| dm_dp.chain(d))?)?;
            }
            if partials {
                partial_matrix = Some(Matrix3(dm_dp));
            }
        }

        Ok((Matrix3(matrix), partial_matrix))
    }

    /// Quaternions of rotation matrices, by the largest-diagonal closed form.
    ///
    /// The branch is picked by the largest of the trace and the three
    /// diagonal entries; ties go to the first diagonal entry. Elements with
    /// no usable pivot are masked. The result may have a negative scalar
    /// part. Derivatives are not supported.
    pub fn from_matrix3(matrix: &Matrix3, recursive: bool) -> RotationResult<Self> {
        if recursive && !matrix.derivs().is_empty() {
            return Err(RotationError::DerivativesNotImplemented {
                op: "Quaternion::from_matrix3",
            });
        }
        matrix.require_no_denom("Quaternion::from_matrix3")?;

        let shape = matrix.shape().to_vec();
        let blocks = matrix.blocks()?;
        let nb = blocks.dim().0;

        let mut degenerate = vec![false; nb];
        let mut data = Vec::with_capacity(nb * 4);

        for e in 0..nb {
            let m = |i: usize, j: usize| blocks[[e, i * 3 + j, 0]];
            let diag = [m(0, 0), m(1, 1), m(2, 2)];
            let trace = diag[0] + diag[1] + diag[2];

            let mut i = 0;
            for c in 1..3 {
                if diag[c] > diag[i] {
                    i = c;
                }
            }

            let mut q_over_s = [0.0; 4];
            let r_sq = if trace > diag[i] {
                let r_sq = 1.0 + trace;
                q_over_s[0] = r_sq;
                q_over_s[1] = m(2, 1) - m(1, 2);
                q_over_s[2] = m(0, 2) - m(2, 0);
                q_over_s[3] = m(1, 0) - m(0, 1);
                r_sq
            } else {
                let j = (i + 1) % 3;
                let k = (i + 2) % 3;
                let r_sq = 1.0 + 2.0 * diag[i] - trace;
                q_over_s[0] = m(k, j) - m(j, k);
                q_over_s[i + 1] = r_sq;
                q_over_s[j + 1] = m(i, j) + m(j, i);
                q_over_s[k + 1] = m(i, k) + m(k, i);
                r_sq
            };

            let r = r_sq.max(0.0).sqrt();
            let s = if r == 0.0 {
                degenerate[e] = true;
                0.5
            } else {
                0.5 / r
            };
            data.extend(q_over_s.iter().map(|v| v * s));
        }

        let masked = degenerate.iter().filter(|&&d| d).count();
        if masked > 0 {
            debug!("from_matrix3: masked {masked} matrices with no usable pivot");
        }
        let mask = matrix.mask().or_flat(&degenerate, &shape)?;
        Ok(Self(Batch::from_flat(&shape, Self::NUMER, &[], data, mask)?))
    }

    /// Quaternions of rotation matrices, by four square roots.
    ///
    /// Each component magnitude comes from the diagonal, and its sign from
    /// the antisymmetric part of the matrix. Derivatives are propagated;
    /// elements where a component is zero get a masked derivative.
    pub fn from_matrix3_experimental(matrix: &Matrix3, recursive: bool) -> RotationResult<Self> {
        matrix.require_no_denom("Quaternion::from_matrix3_experimental")?;

        let shape = matrix.shape().to_vec();
        let blocks = matrix.blocks()?;
        let nb = blocks.dim().0;

        let mut data = Vec::with_capacity(nb * 4);
        let mut factors = Vec::with_capacity(nb);
        let mut div_by_zero = vec![false; nb];

        for e in 0..nb {
            let m = |i: usize, j: usize| blocks[[e, i * 3 + j, 0]];
            let (m00, m11, m22) = (m(0, 0), m(1, 1), m(2, 2));
            let signs = [
                1.0,
                sign(m(2, 1) - m(1, 2)),
                sign(m(0, 2) - m(2, 0)),
                sign(m(1, 0) - m(0, 1)),
            ];
            let roots = [
                (1.0 + m00 + m11 + m22).max(0.0).sqrt(),
                (1.0 + m00 - m11 - m22).max(0.0).sqrt(),
                (1.0 - m00 + m11 - m22).max(0.0).sqrt(),
                (1.0 - m00 - m11 + m22).max(0.0).sqrt(),
            ];
            let q: [f64; 4] = std::array::from_fn(|c| 0.5 * signs[c] * roots[c]);
            data.extend_from_slice(&q);

            // q_c = ±√u/2, so dq_c = ±du/(8·|q_c|) = sign_c·du/(8·q_c)
            let f: [f64; 4] = std::array::from_fn(|c| {
                if q[c] == 0.0 {
                    div_by_zero[e] = true;
                    0.0
                } else {
                    0.125 * signs[c] / q[c].abs()
                }
            });
            factors.push(f);
        }

        let mut result = Batch::from_flat(&shape, Self::NUMER, &[], data, matrix.mask().clone())?;

        if recursive && !matrix.derivs().is_empty() {
            let masked = div_by_zero.iter().filter(|&&z| z).count();
            if masked > 0 {
                warn!("from_matrix3_experimental: masked {masked} derivatives with a zero component");
            }
            let deriv_mask = matrix.mask().or_flat(&div_by_zero, &shape)?;

            let derivs = map_derivs(matrix.derivs(), |deriv| {
                let db = deriv.blocks()?;
                let np = db.dim().2;
                let mut values = vec![0.0; nb * 4 * np];
                for e in 0..nb {
                    let f = factors[e];
                    for p in 0..np {
                        let (d00, d11, d22) = (db[[e, 0, p]], db[[e, 4, p]], db[[e, 8, p]]);
                        let dq = [
                            f[0] * (d00 + d11 + d22),
                            f[1] * (d00 - d11 - d22),
                            f[2] * (-d00 + d11 - d22),
                            f[3] * (-d00 - d11 + d22),
                        ];
                        for (c, value) in dq.into_iter().enumerate() {
                            values[(e * 4 + c) * np + p] = value;
                        }
                    }
                }
                let mask = deriv_mask.or(deriv.mask(), &shape)?;
                Batch::from_flat(&shape, Self::NUMER, deriv.denom(), values, mask)
            })?;
            result.insert_derivs(derivs)?;
        }

        Ok(Self(result))
    }

    /// Quaternions of rotation matrices using the configured algorithm.
    pub fn from_matrix3_with(matrix: &Matrix3, config: &ConversionConfig) -> RotationResult<Self> {
        match config.matrix_conversion {
            MatrixConversion::LargestDiagonal => Self::from_matrix3(matrix, config.recursive),
            MatrixConversion::FourRoots => {
                debug!("from_matrix3: using the four-root conversion");
                Self::from_matrix3_experimental(matrix, config.recursive)
            }
        }
    }
}
