// report.rs - CSV output for sweeps and correlation functions

use std::fs;
use std::path::Path;

use csv::WriterBuilder;

use crate::config::SweepParam;
use crate::correlation::CorrelationSeries;
use crate::error::Result;
use crate::runner::PointResult;

fn opt(x: Option<f64>) -> String {
    x.map(|v| v.to_string()).unwrap_or_default()
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// One row per point. Columns without a value (no autocorrelation analysis) are empty.
pub fn write_sweep_csv(
    path: impl AsRef<Path>,
    param: SweepParam,
    points: &[PointResult],
) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut wtr = WriterBuilder::new().from_path(path)?;

    wtr.write_record([
        "sweep_value",
        "u",
        "mu",
        "midpoint",
        "midpoint_err",
        "corrected_mean",
        "corrected_error",
        "tau_int",
        "n_eff",
        "skip",
        "n_samples",
    ])?;

    for p in points {
        let swept = match param {
            SweepParam::U => p.u,
            SweepParam::Mu => p.mu,
        };
        wtr.write_record(&[
            swept.to_string(),
            p.u.to_string(),
            p.mu.to_string(),
            p.correlation_midpoint.to_string(),
            p.correlation_midpoint_err.to_string(),
            opt(p.corrected_mean),
            opt(p.corrected_error),
            opt(p.tau_int),
            opt(p.n_eff),
            p.thermalization_skip.to_string(),
            p.n_samples.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// `x, mean, err` for every lattice offset.
pub fn write_correlation_csv(path: impl AsRef<Path>, series: &CorrelationSeries) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(["x", "mean", "err"])?;
    for (x, (mean, err)) in series.mean.iter().zip(&series.err).enumerate() {
        wtr.write_record(&[x.to_string(), mean.to_string(), err.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Plain-text table of a sweep for the terminal.
pub fn format_sweep_table(param: SweepParam, points: &[PointResult]) -> String {
    let mut out = format!(
        "{:>10} {:>14} {:>12} {:>14} {:>12} {:>8} {:>6} {:>8}\n",
        param.name(),
        "C(N/2)",
        "err",
        "corrected",
        "corr. err",
        "N_eff",
        "skip",
        "samples"
    );
    for p in points {
        let swept = match param {
            SweepParam::U => p.u,
            SweepParam::Mu => p.mu,
        };
        let fmt_opt = |x: Option<f64>, prec: usize| {
            x.map_or_else(|| "-".to_string(), |v| format!("{v:.prec$}"))
        };
        out.push_str(&format!(
            "{:>10.4} {:>14.6e} {:>12.3e} {:>14} {:>12} {:>8} {:>6} {:>8}\n",
            swept,
            p.correlation_midpoint,
            p.correlation_midpoint_err,
            fmt_opt(p.corrected_mean, 6),
            fmt_opt(p.corrected_error, 6),
            fmt_opt(p.n_eff, 0),
            p.thermalization_skip,
            p.n_samples
        ));
    }
    out
}
