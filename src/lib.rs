//! DKI-RTK - Radial Tensor Kurtosis
//!
//! Estimates radial tensor kurtosis (RTK) from fitted diffusional kurtosis
//! imaging (DKI) parameters, rescales it to the perpendicular kurtosis Kper,
//! and compares Kper against standard radial kurtosis (RK) in a Monte Carlo
//! simulation of a two-compartment white-matter model under Rician noise.

pub mod config;
pub mod fit;
pub mod gradients;
pub mod kurtosis;
pub mod montecarlo;
pub mod output;
pub mod rtk;
pub mod signal;
pub mod tensor;

use thiserror::Error;

// Re-export main types
pub use config::ValidationConfig;
pub use fit::{DkiFit, DkiModel, FitMethod};
pub use gradients::{GradientScheme, GradientTable};
pub use kurtosis::{radial_kurtosis, RkMethod};
pub use montecarlo::{run_validation, summarize, ValidationBatch, ValidationSummary};
pub use rtk::{radial_tensor_kurtosis, rescale_to_kper, KurtosisBounds};
pub use signal::{Compartment, TwoCompartmentModel};
pub use tensor::DkiParams;

#[derive(Debug, Error)]
pub enum RtkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("eigenvectors are not orthonormal (max deviation {deviation:e})")]
    NotOrthonormal { deviation: f64 },
    #[error("non-finite signal value {value} at measurement {index}")]
    NonFiniteSignal { index: usize, value: f64 },
    #[error("least-squares fit failed: {0}")]
    SingularFit(String),
}
