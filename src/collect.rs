// collect.rs - Re-analyse the data files a previous sweep left in a directory

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::SweepParam;
use crate::error::{Result, SqmError};
use crate::runner::{analyze_dat, PointResult};

/// Points recovered from a directory, with the sweep axis inferred from them.
#[derive(Debug, Clone)]
pub struct Collected {
    pub param: SweepParam,
    pub fixed: f64,
    /// Sorted by the swept value
    pub points: Vec<PointResult>,
    /// Files that matched the naming scheme but could not be analysed
    pub skipped: Vec<(PathBuf, String)>,
}

/// `(U, mu)` encoded in a data file name such as `U=20.0,mu=1.5,s=1d0.dat`.
///
/// The `s=` part is optional so files from older runs are picked up too.
pub fn parse_dat_filename(name: &str) -> Option<(f64, f64)> {
    let stem = name.strip_suffix(".dat")?;
    let mut u: Option<f64> = None;
    let mut mu: Option<f64> = None;
    for field in stem.split(',') {
        match field.split_once('=')? {
            ("U", v) => u = Some(v.parse().ok()?),
            ("mu", v) => mu = Some(v.parse().ok()?),
            ("s", _) => {}
            _ => return None,
        }
    }
    Some((u?, mu?))
}

/// Analyse every `U=..,mu=..*.dat` file in `dir`.
///
/// The swept axis is whichever parameter takes more than one value; a
/// directory mixing several values of both is a `Config` error, as is one
/// with no usable files.
pub fn collect_dir(dir: impl AsRef<Path>, skip_autocorrelation: bool) -> Result<Collected> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SqmError::NotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_dat_filename)
                .is_some()
        })
        .collect();
    files.sort();

    let mut points = Vec::new();
    let mut skipped = Vec::new();
    for path in files {
        match analyze_dat(&path, skip_autocorrelation) {
            Ok(point) => points.push(point),
            Err(e) => {
                warn!("skip {}: {e}", path.display());
                skipped.push((path, e.to_string()));
            }
        }
    }
    if points.is_empty() {
        return Err(SqmError::Config(format!(
            "no usable data files in {}",
            dir.display()
        )));
    }

    let distinct = |values: Vec<f64>| {
        let mut v = values;
        v.sort_by(f64::total_cmp);
        v.dedup();
        v
    };
    let us = distinct(points.iter().map(|p| p.u).collect());
    let mus = distinct(points.iter().map(|p| p.mu).collect());

    let (param, fixed) = match (us.as_slice(), mus.as_slice()) {
        ([u], _) => (SweepParam::Mu, *u),
        (_, [mu]) => (SweepParam::U, *mu),
        _ => {
            return Err(SqmError::Config(format!(
                "mixed parameters: {} U values and {} mu values",
                us.len(),
                mus.len()
            )))
        }
    };

    let key = |p: &PointResult| match param {
        SweepParam::U => p.u,
        SweepParam::Mu => p.mu,
    };
    points.sort_by(|a, b| key(a).total_cmp(&key(b)));

    info!(
        "collected {} points ({} sweep, fixed {}={fixed}), {} skipped",
        points.len(),
        param,
        param.other(),
        skipped.len()
    );
    Ok(Collected { param, fixed, points, skipped })
}
