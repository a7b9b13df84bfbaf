//! Radial tensor kurtosis (RTK) and its (MD/RD)² rescaling (Kper)
//!
//! RTK = 3/8 · (Ŵ2222 + Ŵ3333 + 2·Ŵ2233), where Ŵ are kurtosis tensor
//! elements rotated into the diffusion tensor eigenframe. Kper rescales RTK by
//! (MD/RD)² so that it estimates the perpendicular kurtosis.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tensor::{rotate_kt_element, DkiParams};
use crate::RtkError;

/// Independent lower/upper clamp for kurtosis estimates; `None` disables a side.
///
/// When deserialised, a side missing from the table is `None`. A config table
/// `[rtk_bounds]` holding only `min` therefore leaves RTK unbounded above; the
/// preset pairs apply only when the whole table is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KurtosisBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl KurtosisBounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// Bounds applied to RTK before rescaling.
    pub fn rtk_default() -> Self {
        Self::new(Some(-100.0), Some(1000.0))
    }

    /// Bounds applied to standard radial kurtosis.
    pub fn rk_default() -> Self {
        Self::new(Some(-10.0), Some(10.0))
    }

    /// Raise values below `min`, then lower values above `max`.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut value = value;
        if let Some(min) = self.min {
            if value < min {
                value = min;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                value = max;
            }
        }
        value
    }

    pub fn validate(&self, context: &str) -> Result<(), RtkError> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if bound.is_nan() {
                return Err(RtkError::InvalidConfig(format!(
                    "{context} bounds must not be NaN"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(RtkError::InvalidConfig(format!(
                    "{context} min ({min}) must not exceed max ({max})"
                )));
            }
        }
        Ok(())
    }
}

impl Default for KurtosisBounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Eigenframe kurtosis elements entering the RTK definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialElements {
    pub w2222: f64,
    pub w3333: f64,
    pub w2233: f64,
}

impl RadialElements {
    pub fn from_params(params: &DkiParams) -> Self {
        let kt = params.kt();
        let evecs = params.evecs();
        Self {
            w2222: rotate_kt_element(&kt, &evecs, 1, 1, 1, 1),
            w3333: rotate_kt_element(&kt, &evecs, 2, 2, 2, 2),
            w2233: rotate_kt_element(&kt, &evecs, 1, 1, 2, 2),
        }
    }

    pub fn rtk(&self) -> f64 {
        0.375 * (self.w2222 + self.w3333 + 2.0 * self.w2233)
    }
}

/// Unclamped RTK of a single parameter vector.
pub fn rtk_single(params: &DkiParams) -> f64 {
    RadialElements::from_params(params).rtk()
}

/// RTK for every sample, clamped per element; output order follows input.
pub fn radial_tensor_kurtosis(params: &[DkiParams], bounds: KurtosisBounds) -> Vec<f64> {
    params
        .iter()
        .map(|p| bounds.clamp(rtk_single(p)))
        .collect()
}

/// Kper = RTK · MD² / RD². Zero RD is not guarded and gives a non-finite value.
pub fn perpendicular_kurtosis(rtk: f64, md: f64, rd: f64) -> f64 {
    rtk * md * md / (rd * rd)
}

/// Element-wise Kper over parallel slices.
pub fn rescale_to_kper(rtk: &[f64], md: &[f64], rd: &[f64]) -> Result<Vec<f64>, RtkError> {
    ensure_len("kper md", rtk.len(), md.len())?;
    ensure_len("kper rd", rtk.len(), rd.len())?;

    let kper: Vec<f64> = rtk
        .iter()
        .zip(md)
        .zip(rd)
        .map(|((&k, &m), &r)| perpendicular_kurtosis(k, m, r))
        .collect();

    let degenerate = rd.iter().filter(|r| **r == 0.0).count();
    if degenerate > 0 {
        warn!(degenerate, total = rd.len(), "zero radial diffusivity in Kper rescaling");
    }

    Ok(kper)
}

pub(crate) fn ensure_len(
    context: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), RtkError> {
    if expected == actual {
        return Ok(());
    }

    Err(RtkError::LengthMismatch {
        context,
        expected,
        got: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::KT_LEN;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Rotation3, Vector3};
    use proptest::prelude::*;

    fn isotropic_kt(k: f64) -> [f64; KT_LEN] {
        // W_ijkl = k/3 (δij δkl + δik δjl + δil δjk)
        let mut kt = [0.0; KT_LEN];
        kt[0] = k;
        kt[1] = k;
        kt[2] = k;
        kt[9] = k / 3.0;
        kt[10] = k / 3.0;
        kt[11] = k / 3.0;
        kt
    }

    fn params_with(evecs: Matrix3<f64>, kt: [f64; KT_LEN]) -> DkiParams {
        DkiParams::from_parts([1.7e-3, 0.5e-3, 0.3e-3], &evecs, kt)
    }

    #[test]
    fn identity_frame_uses_stored_elements() {
        let mut kt = [0.0; KT_LEN];
        kt[1] = 0.8;
        kt[2] = 1.2;
        kt[11] = 0.25;
        let elements = RadialElements::from_params(&params_with(Matrix3::identity(), kt));
        assert_relative_eq!(elements.w2222, 0.8);
        assert_relative_eq!(elements.w3333, 1.2);
        assert_relative_eq!(elements.w2233, 0.25);
        assert_relative_eq!(elements.rtk(), 0.375 * (0.8 + 1.2 + 0.5));
    }

    #[test]
    fn constant_elements_give_three_halves() {
        let k = 0.7;
        let rtk = rtk_single(&params_with(Matrix3::identity(), [k; KT_LEN]));
        assert_relative_eq!(rtk, 1.5 * k, epsilon = 1e-12);
    }

    #[test]
    fn isotropic_tensor_is_rotation_invariant() {
        let k = 1.3;
        let rot = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.7)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), 1.1);
        let rtk = rtk_single(&params_with(*rot.matrix(), isotropic_kt(k)));
        assert_relative_eq!(rtk, k, epsilon = 1e-12);
    }

    #[test]
    fn disabled_bounds_return_raw_value() {
        let params = params_with(Matrix3::identity(), [-40.0; KT_LEN]);
        let out = radial_tensor_kurtosis(&[params], KurtosisBounds::unbounded());
        assert_relative_eq!(out[0], -60.0, epsilon = 1e-9);
    }

    #[test]
    fn default_rtk_bounds_clip_both_sides() {
        let low = params_with(Matrix3::identity(), [-400.0; KT_LEN]);
        let high = params_with(Matrix3::identity(), [4000.0; KT_LEN]);
        let out = radial_tensor_kurtosis(&[low, high], KurtosisBounds::rtk_default());
        assert_eq!(out, vec![-100.0, 1000.0]);
    }

    #[test]
    fn single_sided_bounds_leave_other_side_open() {
        let bounds = KurtosisBounds::new(Some(0.0), None);
        assert_eq!(bounds.clamp(-3.0), 0.0);
        assert_eq!(bounds.clamp(1.0e6), 1.0e6);
    }

    #[test]
    fn inverted_bounds_fail_validation() {
        assert!(KurtosisBounds::new(Some(1.0), Some(-1.0))
            .validate("rtk")
            .is_err());
        assert!(KurtosisBounds::rk_default().validate("rk").is_ok());
    }

    #[test]
    fn kper_rescales_by_diffusivity_ratio() {
        let kper = rescale_to_kper(&[0.5, 1.0], &[1.0e-3, 0.9e-3], &[0.5e-3, 0.3e-3])
            .expect("equal lengths");
        assert_relative_eq!(kper[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(kper[1], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn kper_length_mismatch_is_reported() {
        assert!(matches!(
            rescale_to_kper(&[1.0, 2.0], &[1.0], &[1.0, 1.0]),
            Err(RtkError::LengthMismatch {
                context: "kper md",
                ..
            })
        ));
    }

    #[test]
    fn zero_rd_propagates_non_finite() {
        let kper = rescale_to_kper(&[0.4], &[1.0e-3], &[0.0]).expect("equal lengths");
        assert!(!kper[0].is_finite());
    }

    #[test]
    fn batch_shape_is_preserved() {
        for n in [1usize, 10, 1000] {
            let params = vec![params_with(Matrix3::identity(), isotropic_kt(1.0)); n];
            assert_eq!(
                radial_tensor_kurtosis(&params, KurtosisBounds::rtk_default()).len(),
                n
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn clamping_is_idempotent_and_respects_bounds(
            value in -1.0e4f64..1.0e4,
            lo in -500.0f64..0.0,
            span in 0.0f64..2000.0,
        ) {
            let bounds = KurtosisBounds::new(Some(lo), Some(lo + span));
            let once = bounds.clamp(value);
            prop_assert_eq!(bounds.clamp(once), once);
            prop_assert!(once >= lo);
            prop_assert!(once <= lo + span);
        }

        #[test]
        fn rtk_outputs_stay_within_bounds(
            kt in prop::collection::vec(-50.0f64..50.0, KT_LEN),
            angle in 0.0f64..std::f64::consts::PI,
        ) {
            let mut elements = [0.0; KT_LEN];
            elements.copy_from_slice(&kt);
            let rot = Rotation3::from_axis_angle(&Vector3::x_axis(), angle);
            let params = params_with(*rot.matrix(), elements);
            let bounds = KurtosisBounds::new(Some(-3.0 / 7.0), Some(10.0));
            let out = radial_tensor_kurtosis(&[params], bounds);
            prop_assert!(out[0] >= -3.0 / 7.0 && out[0] <= 10.0);
            let unclamped = radial_tensor_kurtosis(&[params], KurtosisBounds::unbounded());
            prop_assert_eq!(unclamped[0], rtk_single(&params));
        }
    }
}
