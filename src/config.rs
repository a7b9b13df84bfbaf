use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fit::FitMethod;
use crate::gradients::GradientScheme;
use crate::kurtosis::RkMethod;
use crate::rtk::KurtosisBounds;
use crate::signal::TwoCompartmentModel;
use crate::RtkError;

pub const DEFAULT_TRIALS: usize = 10_000;

/// Lowest biophysically plausible kurtosis, -3/7.
pub const PLAUSIBLE_MIN_KURTOSIS: f64 = -3.0 / 7.0;

/// Common histogram range for RK and Kper.
pub const DEFAULT_HISTOGRAM_RANGE: (f64, f64) = (-2.0, 6.0);

/// Immutable description of one Monte Carlo validation run. Every trial reads
/// it by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub scheme: GradientScheme,
    pub ground_truth: TwoCompartmentModel,
    pub snr: f64,
    pub n_trials: usize,
    pub seed: u64,
    pub fit_method: FitMethod,
    pub rk_method: RkMethod,
    /// A bounds table replaces the default pair as a whole; a side it omits
    /// is unbounded.
    pub rk_bounds: KurtosisBounds,
    pub rtk_bounds: KurtosisBounds,
    pub plausible_min: f64,
    pub histogram_bins: usize,
    pub histogram_range: (f64, f64),
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            scheme: GradientScheme::default(),
            ground_truth: TwoCompartmentModel::default(),
            snr: 30.0,
            n_trials: DEFAULT_TRIALS,
            seed: 2026,
            fit_method: FitMethod::Wls,
            rk_method: RkMethod::Analytical,
            rk_bounds: KurtosisBounds::rk_default(),
            rtk_bounds: KurtosisBounds::rtk_default(),
            plausible_min: PLAUSIBLE_MIN_KURTOSIS,
            histogram_bins: 100,
            histogram_range: DEFAULT_HISTOGRAM_RANGE,
        }
    }
}

impl ValidationConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, RtkError> {
        let raw = fs::read_to_string(path)?;
        let config: ValidationConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RtkError> {
        self.scheme.validate()?;
        self.ground_truth.validate()?;
        self.rk_bounds.validate("rk_bounds")?;
        self.rtk_bounds.validate("rtk_bounds")?;

        if !(self.snr.is_finite() && self.snr > 0.0) {
            return Err(RtkError::InvalidConfig(
                "snr must be finite and greater than zero".to_string(),
            ));
        }

        if self.n_trials == 0 {
            return Err(RtkError::InvalidConfig(
                "n_trials must be greater than zero".to_string(),
            ));
        }

        if let RkMethod::Numerical { directions } = self.rk_method {
            if directions == 0 {
                return Err(RtkError::InvalidConfig(
                    "rk_method.directions must be greater than zero".to_string(),
                ));
            }
        }

        if self.histogram_bins == 0 {
            return Err(RtkError::InvalidConfig(
                "histogram_bins must be greater than zero".to_string(),
            ));
        }

        let (lo, hi) = self.histogram_range;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(RtkError::InvalidConfig(format!(
                "histogram_range must be finite with lo < hi, got ({lo}, {hi})"
            )));
        }

        if !self.plausible_min.is_finite() {
            return Err(RtkError::InvalidConfig(
                "plausible_min must be finite".to_string(),
            ));
        }

        Ok(())
    }
}
