//! Monte Carlo comparison of standard radial kurtosis and Kper
//!
//! Every trial corrupts the same noise-free ground truth with independent
//! Rician noise, fits the DKI model and records RK, RTK and Kper. Trials run
//! in parallel; each derives its own RNG from the run seed and its index, so
//! results do not depend on scheduling.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ValidationConfig;
use crate::fit::{DkiFit, DkiModel};
use crate::gradients::GradientTable;
use crate::signal::{add_rician_noise, dki_signal, ground_truth};
use crate::RtkError;

/// Scalars recorded for one noisy trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub rk: f64,
    pub rtk: f64,
    pub kper: f64,
    pub md: f64,
    pub rd: f64,
}

/// Noise-free estimates of the same ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceValues {
    pub rk: f64,
    pub rtk: f64,
    pub kper: f64,
    pub md: f64,
    pub rd: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationBatch {
    pub table: GradientTable,
    pub records: Vec<TrialRecord>,
    pub reference: ReferenceValues,
}

impl ValidationBatch {
    pub fn rk(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.rk).collect()
    }

    pub fn kper(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.kper).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopulationStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub fraction_below: f64,
    /// NaN or infinite values, excluded from every statistic except
    /// `fraction_below`.
    pub non_finite: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub n_trials: usize,
    pub snr: f64,
    pub seed: u64,
    pub plausible_min: f64,
    pub reference: ReferenceValues,
    pub rk: PopulationStats,
    pub kper: PopulationStats,
    pub rk_histogram: Histogram,
    pub kper_histogram: Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Equal-width bins over a fixed range plus the values that fell outside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub range: (f64, f64),
    pub bins: Vec<HistogramBin>,
    pub underflow: usize,
    pub overflow: usize,
    pub non_finite: usize,
}

fn trial_seed(seed: u64, trial: usize) -> u64 {
    seed ^ (trial as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn record_from_fit(config: &ValidationConfig, fit: &DkiFit, trial: usize) -> TrialRecord {
    let rtk = fit.radial_tensor_kurtosis(config.rtk_bounds);
    TrialRecord {
        trial,
        rk: fit.radial_kurtosis(config.rk_bounds, config.rk_method),
        rtk,
        kper: fit.perpendicular_kurtosis(config.rtk_bounds),
        md: fit.md(),
        rd: fit.rd(),
    }
}

/// One independent noisy realisation of the ground truth.
pub fn run_trial(
    config: &ValidationConfig,
    noise_free: &[f64],
    model: &DkiModel,
    trial: usize,
) -> Result<TrialRecord, RtkError> {
    let mut rng = ChaCha8Rng::seed_from_u64(trial_seed(config.seed, trial));
    let mut signal = noise_free.to_vec();
    add_rician_noise(&mut signal, config.snr, config.ground_truth.s0, &mut rng)?;
    let fit = model.fit(&signal)?;
    Ok(record_from_fit(config, &fit, trial))
}

/// Estimates from the noise-free signal.
pub fn reference_values(
    config: &ValidationConfig,
    noise_free: &[f64],
    model: &DkiModel,
) -> Result<ReferenceValues, RtkError> {
    let fit = model.fit(noise_free)?;
    let record = record_from_fit(config, &fit, 0);
    Ok(ReferenceValues {
        rk: record.rk,
        rtk: record.rtk,
        kper: record.kper,
        md: record.md,
        rd: record.rd,
    })
}

pub fn run_validation(config: &ValidationConfig) -> Result<ValidationBatch, RtkError> {
    config.validate()?;

    let table = config.scheme.build()?;
    let model = DkiModel::new(&table, config.fit_method)?;
    let truth = ground_truth(&config.ground_truth);
    let noise_free = dki_signal(&table, &truth.params, config.ground_truth.s0);

    let reference = reference_values(config, &noise_free, &model)?;
    info!(
        rk = reference.rk,
        rtk = reference.rtk,
        kper = reference.kper,
        "noise-free reference estimates"
    );

    let records = (0..config.n_trials)
        .into_par_iter()
        .map(|trial| run_trial(config, &noise_free, &model, trial))
        .collect::<Result<Vec<_>, _>>()?;

    let non_finite_kper = records.iter().filter(|r| !r.kper.is_finite()).count();
    if non_finite_kper > 0 {
        warn!(
            non_finite_kper,
            trials = records.len(),
            "non-finite Kper in validation trials (zero radial diffusivity)"
        );
    }

    info!(
        trials = records.len(),
        snr = config.snr,
        "monte carlo validation complete"
    );

    Ok(ValidationBatch {
        table,
        records,
        reference,
    })
}

/// Share of values strictly below `threshold`.
pub fn fraction_below(values: &[f64], threshold: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| **v < threshold).count() as f64 / values.len() as f64
}

pub fn population_stats(values: &[f64], threshold: f64) -> PopulationStats {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let non_finite = values.len() - count;
    if count == 0 {
        return PopulationStats {
            count,
            mean: f64::NAN,
            std_dev: f64::NAN,
            median: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            fraction_below: fraction_below(values, threshold),
            non_finite,
        };
    }

    let mean = sorted.iter().sum::<f64>() / count as f64;
    let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        0.5 * (sorted[count / 2 - 1] + sorted[count / 2])
    };

    PopulationStats {
        count,
        mean,
        std_dev: var.sqrt(),
        median,
        min: sorted[0],
        max: sorted[count - 1],
        fraction_below: fraction_below(values, threshold),
        non_finite,
    }
}

/// Both estimators are binned over `config.histogram_range`, so an outlier in
/// one population cannot stretch the bins of the other.
pub fn summarize(config: &ValidationConfig, batch: &ValidationBatch) -> ValidationSummary {
    let rk = batch.rk();
    let kper = batch.kper();
    ValidationSummary {
        n_trials: batch.records.len(),
        snr: config.snr,
        seed: config.seed,
        plausible_min: config.plausible_min,
        reference: batch.reference,
        rk: population_stats(&rk, config.plausible_min),
        kper: population_stats(&kper, config.plausible_min),
        rk_histogram: histogram(&rk, config.histogram_bins, config.histogram_range),
        kper_histogram: histogram(&kper, config.histogram_bins, config.histogram_range),
    }
}

/// Equal-width bins over `range`; the last bin is closed on the right. Finite
/// values outside the range are counted as underflow or overflow.
pub fn histogram(values: &[f64], bins: usize, range: (f64, f64)) -> Histogram {
    let (lo, hi) = range;
    let width = if hi > lo && bins > 0 {
        (hi - lo) / bins as f64
    } else {
        1.0
    };

    let mut counts = vec![0usize; bins];
    let mut underflow = 0;
    let mut overflow = 0;
    let mut non_finite = 0;
    for &v in values {
        if !v.is_finite() {
            non_finite += 1;
        } else if v < lo {
            underflow += 1;
        } else if v > hi || bins == 0 {
            overflow += 1;
        } else {
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
    }

    let bins = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lo: lo + width * i as f64,
            hi: lo + width * (i + 1) as f64,
            count,
        })
        .collect();

    Histogram {
        range,
        bins,
        underflow,
        overflow,
        non_finite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradients::GradientScheme;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn quick_config(n_trials: usize) -> ValidationConfig {
        ValidationConfig {
            scheme: GradientScheme {
                directions: 30,
                iterations: 200,
                ..GradientScheme::default()
            },
            n_trials,
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn batch_has_one_record_per_trial_in_order() {
        let batch = run_validation(&quick_config(16)).expect("valid run");
        assert_eq!(batch.records.len(), 16);
        for (idx, record) in batch.records.iter().enumerate() {
            assert_eq!(record.trial, idx);
            assert!(record.rk >= -10.0 && record.rk <= 10.0);
            assert!(record.rtk >= -100.0 && record.rtk <= 1000.0);
        }
    }

    #[test]
    fn validation_is_reproducible() {
        let a = run_validation(&quick_config(8)).unwrap();
        let b = run_validation(&quick_config(8)).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn trials_are_independent_of_batch_size() {
        let small = run_validation(&quick_config(4)).unwrap();
        let large = run_validation(&quick_config(12)).unwrap();
        assert_eq!(small.records[..], large.records[..4]);
    }

    #[test]
    fn reference_matches_matched_orientation_scenario() {
        let batch = run_validation(&quick_config(1)).unwrap();
        assert_relative_eq!(batch.reference.rtk, 0.4211, epsilon = 5e-4);
        assert_relative_eq!(batch.reference.kper, 3.5143, epsilon = 5e-4);
        assert_relative_eq!(batch.reference.rk, batch.reference.kper, max_relative = 1e-4);
    }

    #[test]
    fn fraction_below_counts_strictly_lower() {
        assert_eq!(fraction_below(&[-1.0, -0.5, 0.0, 1.0], -0.5), 0.25);
        assert_eq!(fraction_below(&[], 0.0), 0.0);
    }

    #[test]
    fn population_stats_summarises_values() {
        let stats = population_stats(&[1.0, 3.0, 2.0, 4.0, f64::NAN], 2.5);
        assert_eq!(stats.count, 4);
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.fraction_below, 0.4);
    }

    #[test]
    fn histogram_counts_every_in_range_value() {
        let values = [0.0, 0.1, 0.5, 0.99, 1.0, 2.0, -1.0, f64::INFINITY, f64::NAN];
        let hist = histogram(&values, 4, (0.0, 1.0));
        assert_eq!(hist.bins.len(), 4);
        assert_eq!(hist.bins.iter().map(|b| b.count).sum::<usize>(), 5);
        assert_eq!(hist.bins[0].count, 2);
        assert_eq!(hist.bins[3].count, 2);
        assert_relative_eq!(hist.bins[3].hi, 1.0);
        assert_eq!(hist.underflow, 1);
        assert_eq!(hist.overflow, 1);
        assert_eq!(hist.non_finite, 2);
    }

    fn batch_from(rk: &[f64], kper: &[f64]) -> ValidationBatch {
        let records = rk
            .iter()
            .zip(kper)
            .enumerate()
            .map(|(trial, (&rk, &kper))| TrialRecord {
                trial,
                rk,
                rtk: 0.0,
                kper,
                md: 7.4e-4,
                rd: 2.6e-4,
            })
            .collect();
        ValidationBatch {
            table: GradientTable::new(vec![0.0], vec![Vector3::zeros()]).unwrap(),
            records,
            reference: ReferenceValues {
                rk: 3.5,
                rtk: 0.42,
                kper: 3.5,
                md: 7.4e-4,
                rd: 2.6e-4,
            },
        }
    }

    #[test]
    fn kper_outlier_does_not_collapse_rk_bins() {
        let config = ValidationConfig::default();
        let rk: Vec<f64> = (0..200).map(|i| i as f64 * 0.02).collect();
        let mut kper = rk.clone();
        kper[17] = -579.437;

        let summary = summarize(&config, &batch_from(&rk, &kper));
        let occupied = summary
            .rk_histogram
            .bins
            .iter()
            .filter(|b| b.count > 0)
            .count();
        assert!(occupied >= 40, "only {occupied} occupied rk bins");
        assert_eq!(summary.rk_histogram.range, summary.kper_histogram.range);
        assert_eq!(summary.kper_histogram.underflow, 1);
        assert_eq!(summary.rk_histogram.underflow, 0);
        let binned: usize = summary.kper_histogram.bins.iter().map(|b| b.count).sum();
        assert_eq!(binned, 199);
    }

    #[test]
    fn summary_counts_non_finite_kper() {
        let config = ValidationConfig::default();
        let rk = [3.0, 3.5, 4.0, 2.5];
        let kper = [3.1, f64::NAN, f64::INFINITY, 2.4];

        let summary = summarize(&config, &batch_from(&rk, &kper));
        assert_eq!(summary.kper.non_finite, 2);
        assert_eq!(summary.kper.count, 2);
        assert_eq!(summary.kper_histogram.non_finite, 2);
        assert_eq!(summary.rk.non_finite, 0);
        assert_relative_eq!(summary.kper.mean, 2.75);
    }
}
