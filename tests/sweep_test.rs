//! Sweep orchestration with an in-process simulator standing in for the binary.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use sqm::cancel::CancelToken;
use sqm::config::{Axis, Config, PathConfig, SweepConfig};
use sqm::error::{Result, SqmError};
use sqm::fortran_io::{write_dat, Header, Sample};
use sqm::runner::{SimJob, Simulator};
use sqm::sweep::{run_sweep, SweepOptions};

const NX: i32 = 4;

fn write_fake_data(path: &Path, u: f64, mu: f64, n: usize) -> Result<()> {
    let mut rng = ChaCha20Rng::seed_from_u64((u * 100.0 + mu) as u64);
    let samples: Vec<Sample> = (0..n)
        .map(|_| Sample {
            a: (0..NX).map(|_| Complex64::new(1.0 + rng.gen::<f64>(), 0.0)).collect(),
            a_ast: (0..NX).map(|_| Complex64::new(u + rng.gen::<f64>(), 0.0)).collect(),
        })
        .collect();
    write_dat(path, &Header { nx: NX, u, mu, ntau: 8 }, &samples)
}

/// Writes random data; fails for one chosen U value.
struct FakeSimulator {
    fail_at_u: Option<f64>,
    n_samples: usize,
    calls: AtomicUsize,
}

impl FakeSimulator {
    fn new(fail_at_u: Option<f64>, n_samples: usize) -> Self {
        Self { fail_at_u, n_samples, calls: AtomicUsize::new(0) }
    }
}

impl Simulator for FakeSimulator {
    fn run(&self, job: &SimJob<'_>, _cancel: &CancelToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let descriptor = fs::read_to_string(job.workdir.join(job.descriptor))?;
        assert!(descriptor.contains(&format!("datfilename = \"{}\"", job.datfilename)));

        if self.fail_at_u == Some(job.u) {
            return Err(SqmError::Process {
                status: "exit status: 1".into(),
                stderr: "injected failure".into(),
            });
        }
        write_fake_data(&job.workdir.join(job.datfilename), job.u, job.mu, self.n_samples)
    }
}

/// Cancels the sweep from inside the first job it runs.
struct CancellingSimulator {
    token: CancelToken,
}

impl Simulator for CancellingSimulator {
    fn run(&self, job: &SimJob<'_>, _cancel: &CancelToken) -> Result<()> {
        self.token.cancel();
        write_fake_data(&job.workdir.join(job.datfilename), job.u, job.mu, 30)
    }
}

fn config_for(dir: &Path, u_values: Vec<f64>) -> Config {
    Config {
        paths: PathConfig { output_dir: dir.to_path_buf(), ..PathConfig::default() },
        sweep: Some(SweepConfig::new(Some(Axis::Sweep(u_values)), Some(Axis::Fixed(0.5))).unwrap()),
        ..Config::default()
    }
}

#[test]
fn test_sweep_with_injected_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), vec![3.0, 1.0, 2.0]);
    let sim = Arc::new(FakeSimulator::new(Some(2.0), 50));

    let result = run_sweep(
        &config,
        sim.clone(),
        SweepOptions { workers: Some(2), ..SweepOptions::default() },
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(sim.calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.points.len(), 2);
    assert_eq!(result.failed.len(), 1);
    assert!(!result.interrupted);
    assert!(result.cancelled.is_empty());
    assert!((result.success_rate() - 2.0 / 3.0).abs() < 1e-12);

    let (u, mu, msg) = &result.failed[0];
    assert_eq!((*u, *mu), (2.0, 0.5));
    assert!(msg.contains("injected failure"), "{msg}");

    let us: Vec<f64> = result.points.iter().map(|p| p.u).collect();
    assert_eq!(us, vec![1.0, 3.0]);

    for p in &result.points {
        assert_eq!(p.n_samples, 50);
        assert_eq!(p.correlation.len(), NX as usize);
        assert_eq!(p.ntau, 8);
        assert!(p.dat_path.exists());
        // 50 samples is enough for the autocorrelation stack.
        assert!(p.corrected_error.is_some());
        assert!(p.n_eff.unwrap() >= 1.0);
    }

    // Descriptors are removed whether the point succeeded or not.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("params_"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_short_series_skip_autocorrelation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), vec![1.0]);
    let sim = Arc::new(FakeSimulator::new(None, 20));

    let result = run_sweep(&config, sim, SweepOptions::default(), &CancelToken::new()).unwrap();
    assert_eq!(result.points.len(), 1);
    let point = &result.points[0];
    assert_eq!(point.n_samples, 20);
    assert!(point.corrected_mean.is_none());
    assert!(point.n_eff.is_none());
    assert_eq!(point.thermalization_skip, 0);
}

#[test]
fn test_opting_out_of_autocorrelation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), vec![1.0, 2.0]);
    let sim = Arc::new(FakeSimulator::new(None, 60));
    let options = SweepOptions { skip_autocorrelation: true, ..SweepOptions::default() };

    let result = run_sweep(&config, sim, options, &CancelToken::new()).unwrap();
    assert_eq!(result.points.len(), 2);
    assert!(result.points.iter().all(|p| p.corrected_error.is_none()));
}

#[test]
fn test_missing_sweep_fails_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        paths: PathConfig { output_dir: dir.path().to_path_buf(), ..PathConfig::default() },
        ..Config::default()
    };
    let sim = Arc::new(FakeSimulator::new(None, 30));
    let err = run_sweep(&config, sim.clone(), SweepOptions::default(), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, SqmError::Config(_)));
    assert_eq!(sim.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_both_axes_swept_is_a_config_error() {
    let err = SweepConfig::new(Some(Axis::Sweep(vec![1.0])), Some(Axis::Sweep(vec![1.0])));
    assert!(matches!(err, Err(SqmError::Config(_))));
}

#[test]
fn test_cancellation_returns_partial_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), vec![1.0, 2.0, 3.0, 4.0]);
    let token = CancelToken::new();
    let sim = Arc::new(CancellingSimulator { token: token.clone() });

    let result = run_sweep(
        &config,
        sim,
        SweepOptions { workers: Some(1), ..SweepOptions::default() },
        &token,
    )
    .unwrap();

    assert!(result.interrupted);
    assert_eq!(result.points.len(), 1);
    assert!(result.failed.is_empty());
    assert_eq!(result.cancelled.len(), 3);
}

#[test]
fn test_already_cancelled_token_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), vec![1.0, 2.0]);
    let token = CancelToken::new();
    token.cancel();
    let sim = Arc::new(FakeSimulator::new(None, 30));

    let result = run_sweep(&config, sim.clone(), SweepOptions::default(), &token).unwrap();
    assert!(result.interrupted);
    assert!(result.points.is_empty());
    assert_eq!(result.cancelled.len(), 2);
    assert_eq!(result.success_rate(), 0.0);
    assert_eq!(sim.calls.load(Ordering::SeqCst), 0);
}
