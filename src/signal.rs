//! Synthetic diffusion-weighted signals from a two-compartment tensor model
//!
//! The ground-truth diffusion and kurtosis tensors of the mixture follow the
//! cumulant expansion of a sum of Gaussian compartments; signals are the DKI
//! prediction of those tensors, optionally corrupted by Rician noise.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::gradients::GradientTable;
use crate::tensor::{
    apparent_diffusion, directional_kurtosis, DkiParams, KT_INDEX_COUNTS, KT_LEN,
};
use crate::RtkError;

/// One Gaussian compartment: eigenvalues (mm²/s), orientation of the primary
/// axis as polar/azimuth angles in degrees, and volume fraction in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compartment {
    pub evals: [f64; 3],
    pub angles_deg: (f64, f64),
    pub fraction: f64,
}

/// Intra- and extra-cellular compartments sharing a baseline signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoCompartmentModel {
    pub s0: f64,
    pub compartments: [Compartment; 2],
}

impl Default for TwoCompartmentModel {
    fn default() -> Self {
        Self {
            s0: 1.0,
            compartments: [
                Compartment {
                    evals: [1.8e-3, 0.03e-3, 0.03e-3],
                    angles_deg: (45.0, 45.0),
                    fraction: 60.0,
                },
                Compartment {
                    evals: [1.6e-3, 0.6e-3, 0.6e-3],
                    angles_deg: (45.0, 45.0),
                    fraction: 40.0,
                },
            ],
        }
    }
}

impl TwoCompartmentModel {
    pub fn validate(&self) -> Result<(), RtkError> {
        if !(self.s0.is_finite() && self.s0 > 0.0) {
            return Err(RtkError::InvalidConfig(
                "ground_truth.s0 must be finite and > 0".to_string(),
            ));
        }
        for c in &self.compartments {
            if c.evals.iter().any(|l| !l.is_finite() || *l < 0.0) {
                return Err(RtkError::InvalidConfig(
                    "compartment eigenvalues must be finite and >= 0".to_string(),
                ));
            }
            if !(0.0..=100.0).contains(&c.fraction) {
                return Err(RtkError::InvalidConfig(
                    "compartment fractions must lie in [0, 100]".to_string(),
                ));
            }
        }
        let total: f64 = self.compartments.iter().map(|c| c.fraction).sum();
        if (total - 100.0).abs() > 1e-6 {
            return Err(RtkError::InvalidConfig(format!(
                "compartment fractions must sum to 100, got {total}"
            )));
        }
        Ok(())
    }
}

/// Unit vector for polar angle `theta` and azimuth `phi`, both in degrees.
pub fn direction_from_angles(theta_deg: f64, phi_deg: f64) -> Vector3<f64> {
    let theta = theta_deg.to_radians();
    let phi = phi_deg.to_radians();
    Vector3::new(
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    )
}

/// Orthonormal frame whose first column is `e0`.
pub fn frame_from_primary(e0: &Vector3<f64>) -> Matrix3<f64> {
    let e0 = e0.normalize();
    let helper = if e0.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let e1 = (helper - e0 * e0.dot(&helper)).normalize();
    let e2 = e0.cross(&e1);
    Matrix3::from_columns(&[e0, e1, e2])
}

/// `R diag(λ) Rᵀ` for a compartment oriented along `(theta, phi)`.
pub fn compartment_tensor(evals: [f64; 3], angles_deg: (f64, f64)) -> Matrix3<f64> {
    let r = frame_from_primary(&direction_from_angles(angles_deg.0, angles_deg.1));
    r * Matrix3::from_diagonal(&Vector3::from(evals)) * r.transpose()
}

/// Ground-truth tensors of the compartment mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub dt: Matrix3<f64>,
    pub kt: [f64; KT_LEN],
    pub params: DkiParams,
}

fn cumulant_term(d: &Matrix3<f64>, idx: [usize; 4]) -> f64 {
    let [i, j, k, l] = idx;
    d[(i, j)] * d[(k, l)] + d[(i, k)] * d[(j, l)] + d[(i, l)] * d[(j, k)]
}

/// Representative index quadruple of each stored kurtosis element.
fn representative_indices(counts: &[u8; 3]) -> [usize; 4] {
    let mut idx = [0usize; 4];
    let mut pos = 0;
    for (axis, &count) in counts.iter().enumerate() {
        for _ in 0..count {
            idx[pos] = axis;
            pos += 1;
        }
    }
    idx
}

/// Eigen-decomposition with eigenvalues sorted in descending order; columns
/// of the returned matrix are the matching eigenvectors.
pub fn decompose_tensor(dt: &Matrix3<f64>) -> ([f64; 3], Matrix3<f64>) {
    let eig = SymmetricEigen::new(*dt);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let evals = [
        eig.eigenvalues[order[0]],
        eig.eigenvalues[order[1]],
        eig.eigenvalues[order[2]],
    ];
    let evecs = Matrix3::from_columns(&[
        eig.eigenvectors.column(order[0]).into_owned(),
        eig.eigenvectors.column(order[1]).into_owned(),
        eig.eigenvectors.column(order[2]).into_owned(),
    ]);
    (evals, evecs)
}

pub fn ground_truth(model: &TwoCompartmentModel) -> GroundTruth {
    let comps: Vec<(f64, Matrix3<f64>)> = model
        .compartments
        .iter()
        .map(|c| (c.fraction / 100.0, compartment_tensor(c.evals, c.angles_deg)))
        .collect();

    let dt = comps
        .iter()
        .fold(Matrix3::zeros(), |acc, (f, d)| acc + d * *f);
    let md = dt.trace() / 3.0;

    let mut kt = [0.0; KT_LEN];
    for (value, counts) in kt.iter_mut().zip(KT_INDEX_COUNTS.iter()) {
        let idx = representative_indices(counts);
        let mixed: f64 = comps.iter().map(|(f, d)| f * cumulant_term(d, idx)).sum();
        *value = (mixed - cumulant_term(&dt, idx)) / (md * md);
    }

    let (evals, evecs) = decompose_tensor(&dt);
    GroundTruth {
        dt,
        kt,
        params: DkiParams::from_parts(evals, &evecs, kt),
    }
}

/// DKI signal prediction `S0 · exp(-b·ADC(n) + b²·MD²·W(n)/6)`.
pub fn dki_signal(table: &GradientTable, params: &DkiParams, s0: f64) -> Vec<f64> {
    let md = params.mean_diffusivity();
    let kt = params.kt();
    table
        .bvals
        .iter()
        .zip(table.bvecs.iter())
        .map(|(&b, n)| {
            if b == 0.0 {
                return s0;
            }
            let adc = apparent_diffusion(params, n);
            let w = directional_kurtosis(&kt, n);
            s0 * (-b * adc + b * b * md * md * w / 6.0).exp()
        })
        .collect()
}

/// Rician corruption with `sigma = s0 / snr`.
pub fn add_rician_noise<R: Rng>(
    signal: &mut [f64],
    snr: f64,
    s0: f64,
    rng: &mut R,
) -> Result<(), RtkError> {
    let sigma = s0 / snr;
    let normal = Normal::new(0.0, sigma).map_err(|err| {
        RtkError::InvalidConfig(format!("invalid noise level for snr {snr}: {err}"))
    })?;

    for s in signal.iter_mut() {
        let n1 = normal.sample(rng);
        let n2 = normal.sample(rng);
        *s = ((*s + n1).powi(2) + n2 * n2).sqrt();
    }
    Ok(())
}

/// Signal of the model on `table`; `snr = None` is noise free.
pub fn simulate<R: Rng>(
    model: &TwoCompartmentModel,
    table: &GradientTable,
    snr: Option<f64>,
    rng: &mut R,
) -> Result<Vec<f64>, RtkError> {
    let truth = ground_truth(model);
    let mut signal = dki_signal(table, &truth.params, model.s0);
    if let Some(snr) = snr {
        add_rician_noise(&mut signal, snr, model.s0, rng)?;
    }
    Ok(signal)
}
