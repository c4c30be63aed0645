// experiment_log.rs - JSON record of a sweep for reproducibility

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, SqmError};
use crate::runner::PointResult;
use crate::sweep::SweepResult;

/// Failure rate above which `warnings` complains.
const FAILURE_WARN_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSummary {
    pub u: f64,
    pub mu: f64,
    pub midpoint: f64,
    pub midpoint_err: f64,
    pub corrected_mean: Option<f64>,
    pub corrected_error: Option<f64>,
    pub tau_int: Option<f64>,
    pub n_eff: Option<f64>,
    pub thermalization_skip: usize,
    pub n_samples: usize,
}

impl From<&PointResult> for PointSummary {
    fn from(p: &PointResult) -> Self {
        Self {
            u: p.u,
            mu: p.mu,
            midpoint: p.correlation_midpoint,
            midpoint_err: p.correlation_midpoint_err,
            corrected_mean: p.corrected_mean,
            corrected_error: p.corrected_error,
            tau_int: p.tau_int,
            n_eff: p.n_eff,
            thermalization_skip: p.thermalization_skip,
            n_samples: p.n_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPoint {
    pub u: f64,
    pub mu: f64,
    pub message: String,
}

/// A point that never ran to completion because the sweep was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancelledPoint {
    pub u: f64,
    pub mu: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Keyed by `U=<u>_mu=<mu>`
    #[serde(default)]
    pub results: BTreeMap<String, PointSummary>,
    #[serde(default)]
    pub failed: Vec<FailedPoint>,
    #[serde(default)]
    pub cancelled: Vec<CancelledPoint>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub walltime_seconds: f64,
}

impl Default for ExperimentLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentLog {
    pub fn new() -> Self {
        Self {
            timestamp: Timestamp::now(),
            parameters: BTreeMap::new(),
            metadata: BTreeMap::new(),
            results: BTreeMap::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            interrupted: false,
            walltime_seconds: 0.0,
        }
    }

    /// Log for a finished (or interrupted) sweep, with the config as parameters.
    pub fn from_sweep(config: &Config, result: &SweepResult) -> Result<Self> {
        let mut log = Self::new();
        if let Value::Object(map) = serde_json::to_value(config)? {
            log.parameters.extend(map);
        }
        log.capture_environment();
        for point in &result.points {
            log.add_point(point);
        }
        log.failed = result
            .failed
            .iter()
            .map(|(u, mu, message)| FailedPoint { u: *u, mu: *mu, message: message.clone() })
            .collect();
        log.cancelled = result
            .cancelled
            .iter()
            .map(|&(u, mu)| CancelledPoint { u, mu })
            .collect();
        log.interrupted = result.interrupted;
        log.walltime_seconds = result.walltime_seconds;
        Ok(log)
    }

    pub fn set_parameter(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        self.parameters.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Record the host, platform and crate version.
    pub fn capture_environment(&mut self) {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        self.metadata.insert("hostname".into(), Value::from(hostname));
        self.metadata.insert(
            "platform".into(),
            Value::from(format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)),
        );
        self.metadata
            .insert("sqm_version".into(), Value::from(env!("CARGO_PKG_VERSION")));
    }

    pub fn add_point(&mut self, point: &PointResult) {
        let key = format!("U={:?}_mu={:?}", point.u, point.mu);
        self.results.insert(key, PointSummary::from(point));
    }

    /// Human-readable problems with the run; empty when nothing looks off.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let attempted = self.results.len() + self.failed.len();
        if attempted > 0 {
            let rate = self.failed.len() as f64 / attempted as f64;
            if rate > FAILURE_WARN_FRACTION {
                warnings.push(format!(
                    "high failure rate: {:.1}% ({}/{} points failed)",
                    rate * 100.0,
                    self.failed.len(),
                    attempted
                ));
            }
        }
        if self.interrupted {
            warnings.push(format!(
                "sweep was interrupted; results are partial ({} points not run)",
                self.cancelled.len()
            ));
        }
        warnings
    }

    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut lines = vec![
            rule.clone(),
            "Experiment Summary".to_string(),
            rule.clone(),
            format!("Timestamp: {}", self.timestamp),
            String::new(),
        ];

        let mut section = |title: &str, map: &BTreeMap<String, Value>| {
            if !map.is_empty() {
                lines.push(format!("--- {title} ---"));
                lines.extend(map.iter().map(|(k, v)| format!("  {k}: {v}")));
                lines.push(String::new());
            }
        };
        section("Parameters", &self.parameters);
        section("Metadata", &self.metadata);

        if !self.results.is_empty() {
            lines.push("--- Results ---".to_string());
            for (name, r) in &self.results {
                lines.push(format!(
                    "  {name}: C(N/2) = {:.6e} ± {:.2e} ({} samples)",
                    r.midpoint, r.midpoint_err, r.n_samples
                ));
            }
            lines.push(String::new());
        }
        if !self.failed.is_empty() {
            lines.push("--- Failed ---".to_string());
            for f in &self.failed {
                lines.push(format!("  U={}, mu={}: {}", f.u, f.mu, f.message));
            }
            lines.push(String::new());
        }
        if !self.cancelled.is_empty() {
            lines.push("--- Cancelled ---".to_string());
            for c in &self.cancelled {
                lines.push(format!("  U={}, mu={}", c.u, c.mu));
            }
            lines.push(String::new());
        }

        let warnings = self.warnings();
        if !warnings.is_empty() {
            lines.push("--- Warnings ---".to_string());
            lines.extend(warnings.into_iter().map(|w| format!("  {w}")));
            lines.push(String::new());
        }

        lines.push(format!("Walltime: {:.1} s", self.walltime_seconds));
        lines.push(rule);
        lines.join("\n")
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SqmError::NotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
