// sweep.rs - Concurrent parameter sweep over a one-dimensional (U, mu) grid
//
// All points are submitted to a bounded worker pool up front. Each worker blocks
// on one external simulation, and finished points come back over a channel in
// completion order.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{Config, SweepConfig, SweepParam};
use crate::error::{Result, SqmError};
use crate::runner::{run_single_point, PointOptions, PointResult, Simulator};

/// Life cycle of one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `self -> next` is a legal step.
    pub fn can_become(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) => true,
            // queued jobs may be cancelled before they ever run
            (JobState::Pending, JobState::Cancelled) => true,
            (JobState::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// Aggregate outcome of a sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    /// Successful points, sorted by the swept value
    pub points: Vec<PointResult>,
    /// `(u, mu, message)` for every point that failed
    pub failed: Vec<(f64, f64, String)>,
    /// Points that never finished because the sweep was interrupted
    pub cancelled: Vec<(f64, f64)>,
    pub walltime_seconds: f64,
    pub interrupted: bool,
}

impl SweepResult {
    /// Fraction of attempted points that succeeded, 0.0 when none were attempted.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.points.len() + self.failed.len();
        if attempted == 0 {
            0.0
        } else {
            self.points.len() as f64 / attempted as f64
        }
    }
}

/// Knobs that are not part of the persisted configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
    /// Worker count; defaults to `min(points, available_parallelism)`
    pub workers: Option<usize>,
    pub skip_autocorrelation: bool,
    pub show_progress: bool,
}

/// Resolved worker count for a sweep of `n_points`.
pub fn worker_count(n_points: usize, requested: Option<usize>) -> usize {
    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    requested.unwrap_or_else(|| n_points.min(available)).max(1)
}

enum JobOutcome {
    Succeeded(Box<PointResult>),
    Failed(String),
    Cancelled,
}

enum Event {
    Started(usize),
    Finished(usize, JobOutcome),
}

fn advance(states: &mut [JobState], idx: usize, next: JobState) {
    debug_assert!(
        states[idx].can_become(next),
        "illegal job transition {:?} -> {next:?}",
        states[idx]
    );
    states[idx] = next;
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

/// Run every point of `config.sweep` and collect the results.
///
/// A missing sweep is a `Config` error raised before anything is dispatched.
/// Per-point failures are recorded and do not stop the other points. When
/// `cancel` trips, running simulations are terminated, queued points are
/// skipped and whatever completed is returned with `interrupted` set.
pub fn run_sweep(
    config: &Config,
    simulator: Arc<dyn Simulator>,
    options: SweepOptions,
    cancel: &CancelToken,
) -> Result<SweepResult> {
    let sweep = config
        .sweep
        .as_ref()
        .ok_or_else(|| SqmError::Config("no sweep configured".into()))?;
    config.seed.get_seed(0)?;
    let grid = sweep.grid();
    let workers = worker_count(grid.len(), options.workers);

    fs::create_dir_all(&config.paths.output_dir)?;

    info!(
        "sweep {} over {} points (fixed {}={}), {} workers",
        sweep.param(),
        grid.len(),
        sweep.param().other(),
        sweep.fixed(),
        workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sqm-worker-{i}"))
        .build()
        .map_err(|e| SqmError::Runtime(format!("cannot build worker pool: {e}")))?;

    let bar = if options.show_progress {
        let bar = ProgressBar::new(grid.len() as u64);
        let template = " {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}";
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let start = Instant::now();
    let shared = Arc::new(config.clone());
    let (tx, rx) = mpsc::channel::<Event>();

    for (idx, &(u, mu)) in grid.iter().enumerate() {
        let tx = tx.clone();
        let cancel = cancel.clone();
        let config = Arc::clone(&shared);
        let simulator = Arc::clone(&simulator);
        let point_options = PointOptions {
            skip_autocorrelation: options.skip_autocorrelation,
            process_id: idx as u64,
        };
        pool.spawn(move || {
            if cancel.is_cancelled() {
                let _ = tx.send(Event::Finished(idx, JobOutcome::Cancelled));
                return;
            }
            let _ = tx.send(Event::Started(idx));
            let run = catch_unwind(AssertUnwindSafe(|| {
                run_single_point(u, mu, &config, simulator.as_ref(), point_options, &cancel)
            }));
            let outcome = match run {
                Ok(Ok(point)) => JobOutcome::Succeeded(Box::new(point)),
                Ok(Err(SqmError::Cancelled)) => JobOutcome::Cancelled,
                Ok(Err(e)) if cancel.is_cancelled() => {
                    debug!("U={u}, mu={mu} stopped by interrupt: {e}");
                    JobOutcome::Cancelled
                }
                Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
                Err(payload) => JobOutcome::Failed(panic_message(payload.as_ref())),
            };
            let _ = tx.send(Event::Finished(idx, outcome));
        });
    }
    drop(tx);

    let mut states = vec![JobState::Pending; grid.len()];
    let mut result = SweepResult::default();

    // Ends once every job has reported and dropped its sender.
    for event in rx {
        match event {
            Event::Started(idx) => advance(&mut states, idx, JobState::Running),
            Event::Finished(idx, outcome) => {
                let (u, mu) = grid[idx];
                match outcome {
                    JobOutcome::Succeeded(point) => {
                        advance(&mut states, idx, JobState::Succeeded);
                        bar.set_message(format!(
                            "U={u:.1}, mu={mu:.1} ({} samples)",
                            point.n_samples
                        ));
                        result.points.push(*point);
                    }
                    JobOutcome::Failed(msg) => {
                        advance(&mut states, idx, JobState::Failed);
                        error!("U={u}, mu={mu} failed: {msg}");
                        result.failed.push((u, mu, msg));
                    }
                    JobOutcome::Cancelled => {
                        advance(&mut states, idx, JobState::Cancelled);
                        result.cancelled.push((u, mu));
                    }
                }
                bar.inc(1);
            }
        }
    }
    bar.finish_and_clear();

    result.interrupted = cancel.is_cancelled();
    result.walltime_seconds = start.elapsed().as_secs_f64();
    sort_by_swept_value(sweep, &mut result);

    if result.interrupted {
        warn!(
            "sweep interrupted: {} done, {} failed, {} cancelled",
            result.points.len(),
            result.failed.len(),
            result.cancelled.len()
        );
    } else {
        info!(
            "sweep finished in {:.1}s: {} done, {} failed",
            result.walltime_seconds,
            result.points.len(),
            result.failed.len()
        );
    }
    Ok(result)
}

fn sort_by_swept_value(sweep: &SweepConfig, result: &mut SweepResult) {
    let key = |u: f64, mu: f64| sweep.swept_value(u, mu);
    result.points.sort_by(|a, b| key(a.u, a.mu).total_cmp(&key(b.u, b.mu)));
    result.failed.sort_by(|a, b| key(a.0, a.1).total_cmp(&key(b.0, b.1)));
    result.cancelled.sort_by(|a, b| key(a.0, a.1).total_cmp(&key(b.0, b.1)));
}

/// `sweep_mu_U20.0` or `sweep_U_mu1.5`
pub fn run_label(sweep: &SweepConfig) -> String {
    match sweep.param() {
        SweepParam::Mu => format!("sweep_mu_U{:.1}", sweep.fixed()),
        SweepParam::U => format!("sweep_U_mu{:.1}", sweep.fixed()),
    }
}

/// Create `<output_dir>/<timestamp>_<label>/`, save the config there and point
/// `<output_dir>/latest` at it.
///
/// Returns a copy of `config` whose output directory is the new run directory.
pub fn prepare_run_directory(config: &Config) -> Result<Config> {
    let sweep = config
        .sweep
        .as_ref()
        .ok_or_else(|| SqmError::Config("no sweep configured".into()))?;
    let timestamp = jiff::Zoned::now().strftime("%Y%m%d_%H%M%S").to_string();
    let run_dir = config
        .paths
        .output_dir
        .join(format!("{timestamp}_{}", run_label(sweep)));
    fs::create_dir_all(&run_dir)?;

    let mut run_config = config.clone();
    run_config.paths.output_dir = run_dir.clone();
    run_config.to_yaml(run_dir.join("config.yaml"))?;

    update_latest_link(&config.paths.output_dir, &run_dir)?;
    info!("run directory {}", run_dir.display());
    Ok(run_config)
}

#[cfg(unix)]
fn update_latest_link(parent: &Path, run_dir: &Path) -> Result<()> {
    let link = parent.join("latest");
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)?;
    }
    let target: PathBuf = run_dir.file_name().map(PathBuf::from).unwrap_or_else(|| run_dir.into());
    std::os::unix::fs::symlink(target, &link)?;
    Ok(())
}

#[cfg(not(unix))]
fn update_latest_link(_parent: &Path, _run_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use JobState::*;
        assert!(Pending.can_become(Running));
        assert!(Pending.can_become(Cancelled));
        assert!(!Pending.can_become(Succeeded));
        assert!(Running.can_become(Failed));
        assert!(!Succeeded.can_become(Running));
        assert!(!Cancelled.can_become(Cancelled));
    }

    #[test]
    fn success_rate_handles_empty() {
        assert_eq!(SweepResult::default().success_rate(), 0.0);
        let r = SweepResult {
            failed: vec![(0.0, 0.0, "x".into())],
            ..SweepResult::default()
        };
        assert_eq!(r.success_rate(), 0.0);
    }

    #[test]
    fn worker_count_is_bounded() {
        assert_eq!(worker_count(3, Some(8)), 8);
        assert_eq!(worker_count(0, None), 1);
        assert!(worker_count(2, None) <= 2);
        assert_eq!(worker_count(5, Some(0)), 1);
    }

    #[test]
    fn labels() {
        use crate::config::Axis;
        let mu_sweep =
            SweepConfig::new(Some(Axis::Fixed(20.0)), Some(Axis::Sweep(vec![0.0]))).unwrap();
        assert_eq!(run_label(&mu_sweep), "sweep_mu_U20.0");
        let u_sweep =
            SweepConfig::new(Some(Axis::Sweep(vec![1.0])), Some(Axis::Fixed(1.5))).unwrap();
        assert_eq!(run_label(&u_sweep), "sweep_U_mu1.5");
    }
}
