//! DKI parameter vector
//!
//! A fitted diffusional kurtosis model is carried as a fixed 27-element
//! record: three diffusion eigenvalues, the 3x3 eigenvector matrix stored
//! row-major (column `i` is eigenvector `i`), and the fifteen independent
//! elements of the fully symmetric fourth-order kurtosis tensor.

use nalgebra::{Matrix3, Vector3};

use crate::RtkError;

/// Number of scalars in one DKI parameter vector.
pub const DKI_PARAM_LEN: usize = 27;

/// Number of independent kurtosis tensor elements.
pub const KT_LEN: usize = 15;

/// Index triple counts `(#x, #y, #z)` of each stored kurtosis element, in
/// canonical order: Wxxxx, Wyyyy, Wzzzz, Wxxxy, Wxxxz, Wxyyy, Wyyyz, Wxzzz,
/// Wyzzz, Wxxyy, Wxxzz, Wyyzz, Wxxyz, Wxyyz, Wxyzz.
pub const KT_INDEX_COUNTS: [[u8; 3]; KT_LEN] = [
    [4, 0, 0],
    [0, 4, 0],
    [0, 0, 4],
    [3, 1, 0],
    [3, 0, 1],
    [1, 3, 0],
    [0, 3, 1],
    [1, 0, 3],
    [0, 1, 3],
    [2, 2, 0],
    [2, 0, 2],
    [0, 2, 2],
    [2, 1, 1],
    [1, 2, 1],
    [1, 1, 2],
];

/// Number of distinct index permutations each stored element stands for.
pub const KT_MULTIPLICITY: [f64; KT_LEN] = [
    1.0, 1.0, 1.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 6.0, 6.0, 6.0, 12.0, 12.0, 12.0,
];

/// One fitted (or ground-truth) DKI parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DkiParams {
    values: [f64; DKI_PARAM_LEN],
}

impl DkiParams {
    /// Wrap a raw 27-element array.
    pub fn new(values: [f64; DKI_PARAM_LEN]) -> Self {
        Self { values }
    }

    /// Build from a slice that must hold exactly 27 values.
    pub fn from_slice(values: &[f64]) -> Result<Self, RtkError> {
        let array: [f64; DKI_PARAM_LEN] =
            values.try_into().map_err(|_| RtkError::LengthMismatch {
                context: "dki parameter vector",
                expected: DKI_PARAM_LEN,
                got: values.len(),
            })?;
        Ok(Self { values: array })
    }

    /// Assemble from eigenvalues, an eigenvector matrix whose columns are the
    /// eigenvectors, and the 15 kurtosis elements.
    pub fn from_parts(evals: [f64; 3], evecs: &Matrix3<f64>, kt: [f64; KT_LEN]) -> Self {
        let mut values = [0.0; DKI_PARAM_LEN];
        values[..3].copy_from_slice(&evals);
        for row in 0..3 {
            for col in 0..3 {
                values[3 + row * 3 + col] = evecs[(row, col)];
            }
        }
        values[12..].copy_from_slice(&kt);
        Self { values }
    }

    pub fn as_array(&self) -> &[f64; DKI_PARAM_LEN] {
        &self.values
    }

    pub fn evals(&self) -> [f64; 3] {
        [self.values[0], self.values[1], self.values[2]]
    }

    /// Eigenvector matrix; column `i` is the eigenvector of `evals()[i]`.
    pub fn evecs(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.values[3..12])
    }

    /// Eigenvector `i` (0 = primary).
    pub fn evec(&self, i: usize) -> Vector3<f64> {
        self.evecs().column(i).into_owned()
    }

    pub fn kt(&self) -> [f64; KT_LEN] {
        let mut kt = [0.0; KT_LEN];
        kt.copy_from_slice(&self.values[12..]);
        kt
    }

    pub fn mean_diffusivity(&self) -> f64 {
        let [l1, l2, l3] = self.evals();
        (l1 + l2 + l3) / 3.0
    }

    pub fn axial_diffusivity(&self) -> f64 {
        self.values[0]
    }

    pub fn radial_diffusivity(&self) -> f64 {
        (self.values[1] + self.values[2]) / 2.0
    }

    /// Largest deviation of `RᵀR` from the identity, where `R` is the
    /// eigenvector matrix.
    pub fn orthonormality_deviation(&self) -> f64 {
        let r = self.evecs();
        (r.transpose() * r - Matrix3::identity()).abs().max()
    }

    /// Reject eigenvector matrices that are not orthonormal within `tol`.
    ///
    /// Nothing in the estimators calls this; rotated elements of a
    /// non-orthonormal frame are returned as-is unless the caller checks.
    pub fn check_orthonormal(&self, tol: f64) -> Result<(), RtkError> {
        let deviation = self.orthonormality_deviation();
        if deviation.is_finite() && deviation <= tol {
            Ok(())
        } else {
            Err(RtkError::NotOrthonormal { deviation })
        }
    }
}

/// Split a flat buffer with a trailing 27-length axis into parameter vectors.
pub fn params_from_flat(flat: &[f64]) -> Result<Vec<DkiParams>, RtkError> {
    if flat.len() % DKI_PARAM_LEN != 0 {
        return Err(RtkError::LengthMismatch {
            context: "flat dki parameter buffer",
            expected: (flat.len() / DKI_PARAM_LEN + 1) * DKI_PARAM_LEN,
            got: flat.len(),
        });
    }

    flat.chunks_exact(DKI_PARAM_LEN)
        .map(DkiParams::from_slice)
        .collect()
}

/// Position of the stored element holding `W_{ijkl}` (indices 0 = x, 1 = y,
/// 2 = z).
pub fn kt_position(i: usize, j: usize, k: usize, l: usize) -> usize {
    let mut counts = [0u8; 3];
    for idx in [i, j, k, l] {
        counts[idx] += 1;
    }
    KT_INDEX_COUNTS
        .iter()
        .position(|c| *c == counts)
        .unwrap_or_else(|| unreachable!("every index quadruple maps to a stored element"))
}

/// Any of the 81 entries of the full symmetric tensor.
pub fn kt_element(kt: &[f64; KT_LEN], i: usize, j: usize, k: usize, l: usize) -> f64 {
    kt[kt_position(i, j, k, l)]
}

/// Expand the 15 stored elements into the full 3x3x3x3 tensor.
pub fn full_kurtosis_tensor(kt: &[f64; KT_LEN]) -> [[[[f64; 3]; 3]; 3]; 3] {
    let mut w = [[[[0.0; 3]; 3]; 3]; 3];
    for (i, wi) in w.iter_mut().enumerate() {
        for (j, wij) in wi.iter_mut().enumerate() {
            for (k, wijk) in wij.iter_mut().enumerate() {
                for (l, value) in wijk.iter_mut().enumerate() {
                    *value = kt_element(kt, i, j, k, l);
                }
            }
        }
    }
    w
}

/// Element `(a, b, c, d)` of the kurtosis tensor rotated into the frame whose
/// axes are the columns of `evecs`:
/// `W'_{abcd} = Σ R_{pa} R_{qb} R_{rc} R_{sd} W_{pqrs}`.
pub fn rotate_kt_element(
    kt: &[f64; KT_LEN],
    evecs: &Matrix3<f64>,
    a: usize,
    b: usize,
    c: usize,
    d: usize,
) -> f64 {
    let w = full_kurtosis_tensor(kt);
    let mut sum = 0.0;
    for p in 0..3 {
        let rp = evecs[(p, a)];
        for q in 0..3 {
            let rq = rp * evecs[(q, b)];
            for r in 0..3 {
                let rr = rq * evecs[(r, c)];
                for s in 0..3 {
                    sum += rr * evecs[(s, d)] * w[p][q][r][s];
                }
            }
        }
    }
    sum
}

/// `W(n) = Σ W_{ijkl} n_i n_j n_k n_l` for a unit direction `n`.
pub fn directional_kurtosis(kt: &[f64; KT_LEN], n: &Vector3<f64>) -> f64 {
    KT_INDEX_COUNTS
        .iter()
        .zip(KT_MULTIPLICITY.iter())
        .zip(kt.iter())
        .map(|((counts, mult), w)| {
            mult * w
                * n.x.powi(counts[0] as i32)
                * n.y.powi(counts[1] as i32)
                * n.z.powi(counts[2] as i32)
        })
        .sum()
}

/// Apparent diffusion coefficient `nᵀ D n` with `D = R diag(λ) Rᵀ`.
pub fn apparent_diffusion(params: &DkiParams, n: &Vector3<f64>) -> f64 {
    let evecs = params.evecs();
    params
        .evals()
        .iter()
        .enumerate()
        .map(|(i, lambda)| {
            let proj = evecs.column(i).dot(n);
            lambda * proj * proj
        })
        .sum()
}

/// Apparent kurtosis coefficient `MD² / ADC(n)² · W(n)`.
pub fn apparent_kurtosis(params: &DkiParams, n: &Vector3<f64>) -> f64 {
    let md = params.mean_diffusivity();
    let adc = apparent_diffusion(params, n);
    md * md / (adc * adc) * directional_kurtosis(&params.kt(), n)
}
