//! Kurtosis tensor model fit
//!
//! Linear least squares on the log signal: six diffusion tensor terms, fifteen
//! `MD²·W` terms and `log S0`. The weighted variant reweights rows by the
//! ordinary-least-squares signal prediction.

use nalgebra::{DMatrix, DVector, Matrix3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gradients::GradientTable;
use crate::kurtosis::{axial_kurtosis, radial_kurtosis, RkMethod};
use crate::rtk::{perpendicular_kurtosis, rtk_single, KurtosisBounds};
use crate::signal::{decompose_tensor, dki_signal};
use crate::tensor::{DkiParams, KT_INDEX_COUNTS, KT_LEN, KT_MULTIPLICITY};
use crate::RtkError;

/// Signals are clipped to this floor before taking the logarithm.
pub const MIN_SIGNAL: f64 = 1.0e-4;

/// Unknowns of the linearised DKI model.
pub const DESIGN_COLUMNS: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    Ols,
    #[default]
    Wls,
}

/// Rows: `-b·[gx², 2gxgy, gy², 2gxgz, 2gygz, gz²]`, `b²/6 · mult · monomial`
/// for each stored kurtosis element, and `-1`.
pub fn design_matrix(table: &GradientTable) -> DMatrix<f64> {
    let mut a = DMatrix::zeros(table.len(), DESIGN_COLUMNS);

    for (row, (&b, g)) in table.bvals.iter().zip(table.bvecs.iter()).enumerate() {
        let (x, y, z) = (g.x, g.y, g.z);
        let diffusion = [x * x, 2.0 * x * y, y * y, 2.0 * x * z, 2.0 * y * z, z * z];
        for (col, term) in diffusion.iter().enumerate() {
            a[(row, col)] = -b * term;
        }

        for (offset, (counts, mult)) in KT_INDEX_COUNTS.iter().zip(KT_MULTIPLICITY).enumerate() {
            let monomial =
                x.powi(counts[0] as i32) * y.powi(counts[1] as i32) * z.powi(counts[2] as i32);
            a[(row, 6 + offset)] = b * b / 6.0 * mult * monomial;
        }

        a[(row, DESIGN_COLUMNS - 1)] = -1.0;
    }

    a
}

fn solve_least_squares(a: DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>, RtkError> {
    let svd = a.svd(true, true);
    let eps = svd.singular_values.max() * DESIGN_COLUMNS as f64 * f64::EPSILON;
    svd.solve(y, eps).map_err(|msg| RtkError::SingularFit(msg.to_string()))
}

/// Fitted model for one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DkiFit {
    pub params: DkiParams,
    pub s0: f64,
}

impl DkiFit {
    pub fn md(&self) -> f64 {
        self.params.mean_diffusivity()
    }

    pub fn rd(&self) -> f64 {
        self.params.radial_diffusivity()
    }

    pub fn ad(&self) -> f64 {
        self.params.axial_diffusivity()
    }

    pub fn radial_kurtosis(&self, bounds: KurtosisBounds, method: RkMethod) -> f64 {
        radial_kurtosis(&self.params, bounds, method)
    }

    pub fn axial_kurtosis(&self, bounds: KurtosisBounds) -> f64 {
        axial_kurtosis(&self.params, bounds)
    }

    pub fn radial_tensor_kurtosis(&self, bounds: KurtosisBounds) -> f64 {
        bounds.clamp(rtk_single(&self.params))
    }

    /// Kper from a clamped RTK and this fit's diffusivities.
    pub fn perpendicular_kurtosis(&self, rtk_bounds: KurtosisBounds) -> f64 {
        perpendicular_kurtosis(self.radial_tensor_kurtosis(rtk_bounds), self.md(), self.rd())
    }

    pub fn predict(&self, table: &GradientTable) -> Vec<f64> {
        dki_signal(table, &self.params, self.s0)
    }
}

/// Design matrix and solver state for one gradient table; shared read-only
/// across fits.
#[derive(Debug, Clone)]
pub struct DkiModel {
    design: DMatrix<f64>,
    pinv: DMatrix<f64>,
    method: FitMethod,
}

impl DkiModel {
    pub fn new(table: &GradientTable, method: FitMethod) -> Result<Self, RtkError> {
        if table.len() < DESIGN_COLUMNS {
            return Err(RtkError::InvalidConfig(format!(
                "DKI fit needs at least {DESIGN_COLUMNS} measurements, got {}",
                table.len()
            )));
        }

        let design = design_matrix(table);
        let svd = design.clone().svd(true, true);
        let max_sv = svd.singular_values.max();
        let tol = max_sv * table.len() as f64 * f64::EPSILON;
        let rank = svd.singular_values.iter().filter(|s| **s > tol).count();
        if rank < DESIGN_COLUMNS {
            return Err(RtkError::SingularFit(format!(
                "design matrix rank {rank} < {DESIGN_COLUMNS}; use more directions or shells"
            )));
        }
        let pinv = svd
            .pseudo_inverse(tol)
            .map_err(|msg| RtkError::SingularFit(msg.to_string()))?;

        debug!(rows = table.len(), ?method, "built DKI design matrix");
        Ok(Self {
            design,
            pinv,
            method,
        })
    }

    pub fn method(&self) -> FitMethod {
        self.method
    }

    /// Fit one signal. Finite values below `MIN_SIGNAL` are clipped to it;
    /// NaN or infinite values are rejected.
    pub fn fit(&self, signal: &[f64]) -> Result<DkiFit, RtkError> {
        if signal.len() != self.design.nrows() {
            return Err(RtkError::LengthMismatch {
                context: "dki fit signal",
                expected: self.design.nrows(),
                got: signal.len(),
            });
        }
        if let Some((index, &value)) = signal.iter().enumerate().find(|(_, s)| !s.is_finite()) {
            return Err(RtkError::NonFiniteSignal { index, value });
        }

        let log_s = DVector::from_iterator(
            signal.len(),
            signal.iter().map(|s| s.max(MIN_SIGNAL).ln()),
        );
        let mut x = &self.pinv * &log_s;

        if self.method == FitMethod::Wls {
            let w = (&self.design * &x).map(f64::exp);
            let mut weighted = self.design.clone();
            for (mut row, wi) in weighted.row_iter_mut().zip(w.iter()) {
                row *= *wi;
            }
            let rhs = log_s.component_mul(&w);
            x = solve_least_squares(weighted, &rhs)?;
        }

        Ok(params_from_solution(&x))
    }
}

/// KT is normalised by the MD of the clipped eigenvalues, the same MD that
/// `DkiFit::md` reports.
fn params_from_solution(x: &DVector<f64>) -> DkiFit {
    let dt = Matrix3::new(x[0], x[1], x[3], x[1], x[2], x[4], x[3], x[4], x[5]);
    let (evals, evecs) = decompose_tensor(&dt);
    let evals = evals.map(|l| l.max(0.0));
    let md = evals.iter().sum::<f64>() / 3.0;

    let mut kt = [0.0; KT_LEN];
    for (idx, value) in kt.iter_mut().enumerate() {
        *value = x[6 + idx] / (md * md);
    }

    DkiFit {
        params: DkiParams::from_parts(evals, &evecs, kt),
        s0: (-x[DESIGN_COLUMNS - 1]).exp(),
    }
}
