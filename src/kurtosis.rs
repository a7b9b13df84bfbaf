//! Standard radial and axial kurtosis of a fitted DKI model

use serde::{Deserialize, Serialize};

use crate::rtk::{KurtosisBounds, RadialElements};
use crate::tensor::{apparent_kurtosis, rotate_kt_element, DkiParams};

/// Relative gap `|λ2 - λ3| / λ2` below which the axially symmetric limit of
/// the radial kurtosis coefficients is used.
pub const AXIAL_SYMMETRY_TOL: f64 = 1.0e-5;

/// How radial kurtosis is integrated over the perpendicular circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum RkMethod {
    /// Closed form in the diffusion eigenframe.
    #[default]
    Analytical,
    /// Mean apparent kurtosis over evenly spaced perpendicular directions.
    Numerical { directions: usize },
}

fn g1(l1: f64, l2: f64, l3: f64) -> f64 {
    let sum = l1 + l2 + l3;
    if (l2 - l3).abs() <= AXIAL_SYMMETRY_TOL * l2 {
        return sum * sum / (24.0 * l2 * l2);
    }
    sum * sum / (18.0 * l2 * (l2 - l3).powi(2))
        * (2.0 * l2 + (l3 * l3 - 3.0 * l2 * l3) / (l2 * l3).sqrt())
}

fn g2(l1: f64, l2: f64, l3: f64) -> f64 {
    let sum = l1 + l2 + l3;
    if (l2 - l3).abs() <= AXIAL_SYMMETRY_TOL * l2 {
        return sum * sum / (12.0 * l2 * l2);
    }
    sum * sum / (3.0 * (l2 - l3).powi(2)) * ((l2 + l3) / (l2 * l3).sqrt() - 2.0)
}

fn analytical_rk(params: &DkiParams) -> f64 {
    let [l1, l2, l3] = params.evals();
    if l1 <= 0.0 || l2 <= 0.0 || l3 <= 0.0 {
        return 0.0;
    }
    let w = RadialElements::from_params(params);
    g1(l1, l2, l3) * w.w2222 + g1(l1, l3, l2) * w.w3333 + g2(l1, l2, l3) * w.w2233
}

fn numerical_rk(params: &DkiParams, directions: usize) -> f64 {
    if directions == 0 || params.evals().iter().any(|l| *l <= 0.0) {
        return 0.0;
    }
    let v2 = params.evec(1);
    let v3 = params.evec(2);
    let total: f64 = (0..directions)
        .map(|k| {
            let theta = std::f64::consts::PI * k as f64 / directions as f64;
            let n = v2 * theta.cos() + v3 * theta.sin();
            apparent_kurtosis(params, &n)
        })
        .sum();
    total / directions as f64
}

/// Mean kurtosis over directions perpendicular to the primary eigenvector,
/// clamped to `bounds`. Samples with a non-positive eigenvalue give 0 before
/// clamping.
pub fn radial_kurtosis(params: &DkiParams, bounds: KurtosisBounds, method: RkMethod) -> f64 {
    let rk = match method {
        RkMethod::Analytical => analytical_rk(params),
        RkMethod::Numerical { directions } => numerical_rk(params, directions),
    };
    bounds.clamp(rk)
}

/// Kurtosis along the primary eigenvector, `MD²/λ1² · Ŵ1111`.
pub fn axial_kurtosis(params: &DkiParams, bounds: KurtosisBounds) -> f64 {
    let l1 = params.axial_diffusivity();
    if l1 <= 0.0 {
        return bounds.clamp(0.0);
    }
    let md = params.mean_diffusivity();
    let w1111 = rotate_kt_element(&params.kt(), &params.evecs(), 0, 0, 0, 0);
    bounds.clamp(md * md / (l1 * l1) * w1111)
}
