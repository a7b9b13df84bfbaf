use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;

use crate::montecarlo::{Histogram, TrialRecord, ValidationSummary};
use crate::RtkError;

fn fmt_f64(value: f64) -> String {
    format!("{value:.10}")
}

/// Fresh `<root>/<UTC timestamp>` directory; a numeric suffix is appended when
/// the timestamp is already taken.
pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf, RtkError> {
    fs::create_dir_all(root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

pub fn write_trials_csv(path: &Path, records: &[TrialRecord]) -> Result<(), RtkError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["trial", "rk", "rtk", "kper", "md", "rd"])?;

    for record in records {
        writer.write_record([
            record.trial.to_string(),
            fmt_f64(record.rk),
            fmt_f64(record.rtk),
            fmt_f64(record.kper),
            format!("{:.6e}", record.md),
            format!("{:.6e}", record.rd),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// One row per bin and estimator, so both populations share a single file.
/// Underflow and overflow are written as open-ended `-inf` / `inf` bins.
pub fn write_histogram_csv(path: &Path, histograms: &[(&str, &Histogram)]) -> Result<(), RtkError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["estimator", "bin_lo", "bin_hi", "count"])?;

    for (estimator, hist) in histograms {
        let (lo, hi) = hist.range;
        let rows = std::iter::once((f64::NEG_INFINITY, lo, hist.underflow))
            .chain(hist.bins.iter().map(|bin| (bin.lo, bin.hi, bin.count)))
            .chain(std::iter::once((hi, f64::INFINITY, hist.overflow)));
        for (bin_lo, bin_hi, count) in rows {
            writer.write_record([
                estimator.to_string(),
                fmt_f64(bin_lo),
                fmt_f64(bin_hi),
                count.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &ValidationSummary) -> Result<(), RtkError> {
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}
