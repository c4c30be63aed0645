// config.rs - Run configuration: simulation literals, paths, sweep axes and seeding
//
// Value types are immutable once built; cross-field rules live in constructing
// functions that return `Result`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqmError};

/// Parameters forwarded verbatim to the simulation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Imaginary-time step (Fortran literal)
    pub dtau: String,
    /// Flow-equation step (Fortran literal)
    pub ds: String,
    /// Flow-equation end value (Fortran literal)
    pub s_end: String,
    #[serde(rename = "Nsample")]
    pub nsample: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dtau: "0.3d0".into(),
            ds: "0.3d-5".into(),
            s_end: "1d0".into(),
            nsample: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub output_dir: PathBuf,
    pub fortran_binary: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            fortran_binary: PathBuf::from("./a.out"),
        }
    }
}

impl PathConfig {
    /// Same paths made absolute against the current directory.
    ///
    /// The simulation runs with its working directory set to the output
    /// directory, so a relative binary path would otherwise break.
    pub fn resolved(&self) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let abs = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
        Ok(Self {
            output_dir: abs(&self.output_dir),
            fortran_binary: abs(&self.fortran_binary),
        })
    }
}

/// The two physical parameters a sweep can run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepParam {
    #[serde(rename = "U")]
    U,
    #[serde(rename = "mu")]
    Mu,
}

impl SweepParam {
    pub fn name(self) -> &'static str {
        match self {
            SweepParam::U => "U",
            SweepParam::Mu => "mu",
        }
    }

    pub fn other(self) -> Self {
        match self {
            SweepParam::U => SweepParam::Mu,
            SweepParam::Mu => SweepParam::U,
        }
    }
}

impl fmt::Display for SweepParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How one parameter enters the grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Axis {
    Fixed(f64),
    Sweep(Vec<f64>),
}

/// `start, start + step, …` strictly below `end`.
///
/// Each value is rounded to 10 decimals so accumulated steps give clean
/// filenames (0.1 + 0.2 becomes 0.3).
pub fn arange(start: f64, end: f64, step: f64) -> Result<Vec<f64>> {
    if !(step > 0.0) || !step.is_finite() {
        return Err(SqmError::Config(format!("step must be positive, got {step}")));
    }
    if !start.is_finite() || !end.is_finite() {
        return Err(SqmError::Config(format!("non-finite range {start}..{end}")));
    }
    let round10 = |x: f64| (x * 1e10).round() / 1e10;
    let mut values = Vec::new();
    let mut current = start;
    while current < end {
        values.push(current);
        current = round10(current + step);
    }
    Ok(values)
}

/// A validated one-dimensional sweep: one parameter varies, the other is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSweep", into = "RawSweep")]
pub struct SweepConfig {
    param: SweepParam,
    fixed: f64,
    values: Vec<f64>,
}

impl SweepConfig {
    /// Build a sweep from the two axis settings.
    ///
    /// Exactly one of `u` and `mu` must be `Axis::Sweep`. An unspecified fixed
    /// parameter defaults to 0.0. Sweep values must be finite and distinct, since
    /// every point's files are keyed by its parameters.
    pub fn new(u: Option<Axis>, mu: Option<Axis>) -> Result<Self> {
        let (param, fixed, values) = match (u, mu) {
            (Some(Axis::Sweep(_)), Some(Axis::Sweep(_))) => {
                return Err(SqmError::Config(
                    "cannot sweep U and mu simultaneously; fix one of them".into(),
                ))
            }
            (Some(Axis::Sweep(v)), other) => (SweepParam::U, fixed_value(other), v),
            (other, Some(Axis::Sweep(v))) => (SweepParam::Mu, fixed_value(other), v),
            _ => {
                return Err(SqmError::Config(
                    "one of U or mu must be swept; both are fixed".into(),
                ))
            }
        };

        if values.is_empty() {
            return Err(SqmError::Config(format!("{param} sweep has no values")));
        }
        if !fixed.is_finite() || values.iter().any(|v| !v.is_finite()) {
            return Err(SqmError::Config("sweep values must be finite".into()));
        }
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(SqmError::Config(format!("{param} sweep contains duplicate values")));
        }

        Ok(Self { param, fixed, values })
    }

    /// Swept parameter
    pub fn param(&self) -> SweepParam {
        self.param
    }

    /// Value of the parameter that is held fixed
    pub fn fixed(&self) -> f64 {
        self.fixed
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `(U, mu)` for every point, in sweep order.
    pub fn grid(&self) -> Vec<(f64, f64)> {
        self.values
            .iter()
            .map(|&v| match self.param {
                SweepParam::U => (v, self.fixed),
                SweepParam::Mu => (self.fixed, v),
            })
            .collect()
    }

    /// The coordinate of `(u, mu)` along the swept axis.
    pub fn swept_value(&self, u: f64, mu: f64) -> f64 {
        match self.param {
            SweepParam::U => u,
            SweepParam::Mu => mu,
        }
    }
}

fn fixed_value(axis: Option<Axis>) -> f64 {
    match axis {
        Some(Axis::Fixed(x)) => x,
        _ => 0.0,
    }
}

/// On-disk form of a sweep, matching the flat keys the CLI flags use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct RawSweep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub U: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub U_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub U_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub U_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub U_values: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu_values: Option<Vec<f64>>,
}

/// Combine a fixed value, a range triple and an explicit list for one parameter.
fn axis_from_parts(
    name: &str,
    fixed: Option<f64>,
    range: (Option<f64>, Option<f64>, Option<f64>),
    list: Option<Vec<f64>>,
) -> Result<Option<Axis>> {
    let swept = match (range, list) {
        ((None, None, None), None) => None,
        ((Some(s), Some(e), Some(st)), None) => Some(arange(s, e, st)?),
        ((None, None, None), Some(v)) => Some(v),
        (_, None) => {
            return Err(SqmError::Config(format!(
                "{name} sweep needs all of {name}_start, {name}_end and {name}_step"
            )))
        }
        _ => {
            return Err(SqmError::Config(format!(
                "{name} sweep given both as a range and as a value list"
            )))
        }
    };
    match (fixed, swept) {
        (Some(_), Some(_)) => Err(SqmError::Config(format!(
            "{name} cannot be both fixed and swept"
        ))),
        (Some(x), None) => Ok(Some(Axis::Fixed(x))),
        (None, Some(v)) => Ok(Some(Axis::Sweep(v))),
        (None, None) => Ok(None),
    }
}

impl TryFrom<RawSweep> for SweepConfig {
    type Error = SqmError;

    fn try_from(raw: RawSweep) -> Result<Self> {
        let u = axis_from_parts("U", raw.U, (raw.U_start, raw.U_end, raw.U_step), raw.U_values)?;
        let mu = axis_from_parts(
            "mu",
            raw.mu,
            (raw.mu_start, raw.mu_end, raw.mu_step),
            raw.mu_values,
        )?;
        SweepConfig::new(u, mu)
    }
}

impl From<SweepConfig> for RawSweep {
    fn from(cfg: SweepConfig) -> Self {
        let mut raw = RawSweep::default();
        match cfg.param {
            SweepParam::U => {
                raw.mu = Some(cfg.fixed);
                raw.U_values = Some(cfg.values);
            }
            SweepParam::Mu => {
                raw.U = Some(cfg.fixed);
                raw.mu_values = Some(cfg.values);
            }
        }
        raw
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Let the simulation draw from system entropy
    #[default]
    System,
    /// Use `base_seed` for every point
    Fixed,
    /// `base_seed + process_id`
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub mode: SeedMode,
    pub base_seed: Option<u64>,
}

impl SeedConfig {
    /// Seed for the given worker, `None` in system mode.
    pub fn get_seed(&self, process_id: u64) -> Result<Option<u64>> {
        match (self.mode, self.base_seed) {
            (SeedMode::System, _) => Ok(None),
            (SeedMode::Fixed, seed) => Ok(seed),
            (SeedMode::Hybrid, Some(base)) => Ok(Some(base.wrapping_add(process_id))),
            (SeedMode::Hybrid, None) => Err(SqmError::Config(
                "hybrid seed mode requires base_seed".into(),
            )),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub paths: PathConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepConfig>,
    pub seed: SeedConfig,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_saphyr::from_str(s).map_err(|e| SqmError::Yaml(e.to_string()))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_saphyr::to_string(self).map_err(|e| SqmError::Yaml(e.to_string()))
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&read_config(path.as_ref())?)
    }

    pub fn to_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        write_config(path.as_ref(), &self.to_yaml_string()?)
    }

    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&read_config(path.as_ref())?)?)
    }

    pub fn to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        write_config(path.as_ref(), &serde_json::to_string_pretty(self)?)
    }

    /// Load by extension: `.json` as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(path),
            _ => Self::from_yaml(path),
        }
    }
}

fn read_config(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(SqmError::NotFound(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

fn write_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
