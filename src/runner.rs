// runner.rs - One (U, mu) point: descriptor, external simulation, correlation and error analysis

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::autocorrelation::detect_thermalization;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::correlation::{correlation_from_samples, midpoint_series, CorrelationSeries};
use crate::error::{Result, SqmError};
use crate::error_analysis::ErrorAnalysis;
use crate::fortran_io::{dat_filename, params_filename, read_dat, Descriptor};

/// Series shorter than this skip burn-in detection and the corrected errors.
pub const MIN_AUTOCORR_SAMPLES: usize = 20;
/// Burn-in detection window, in samples.
pub const THERMALIZATION_WINDOW: usize = 10;
/// Samples that must remain after burn-in for the corrected statistics.
pub const MIN_SAMPLES_AFTER_SKIP: usize = 10;

/// Everything a simulator needs to produce one point's data file.
#[derive(Debug, Clone, Copy)]
pub struct SimJob<'a> {
    pub u: f64,
    pub mu: f64,
    /// Descriptor file name, relative to `workdir`
    pub descriptor: &'a str,
    /// Expected output file name, relative to `workdir`
    pub datfilename: &'a str,
    pub workdir: &'a Path,
    pub nsample: u32,
}

/// Produces the `.dat` file described by a job.
///
/// `ExternalBinary` is the production implementation; tests substitute
/// in-process fakes.
pub trait Simulator: Send + Sync {
    fn run(&self, job: &SimJob<'_>, cancel: &CancelToken) -> Result<()>;
}

/// Runs a compiled simulation program as `binary <descriptor>` inside the workdir.
#[derive(Debug, Clone)]
pub struct ExternalBinary {
    binary: PathBuf,
}

impl ExternalBinary {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Simulator for ExternalBinary {
    fn run(&self, job: &SimJob<'_>, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(job.descriptor)
            .current_dir(job.workdir)
            .env("GFORTRAN_UNBUFFERED_ALL", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let _registration = cancel.register_child(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // stderr is drained on its own thread so neither pipe can fill up and
        // stall the child.
        let stderr_text = std::thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || {
                let mut bytes = Vec::new();
                if let Some(mut pipe) = stderr {
                    let _ = pipe.read_to_end(&mut bytes);
                }
                String::from_utf8_lossy(&bytes).into_owned()
            });
            if let Some(pipe) = stdout {
                drain_progress(BufReader::new(pipe), job);
            }
            stderr_reader.join().unwrap_or_default()
        });

        let status = child.wait()?;
        if status.success() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(SqmError::Cancelled);
        }
        Err(SqmError::Process {
            status: status.to_string(),
            stderr: stderr_text.trim().to_string(),
        })
    }
}

/// Log `sample:` progress lines until the child closes stdout.
///
/// The pipe is read to EOF even when a line is not valid UTF-8 or a read fails,
/// since closing it early would kill the child with SIGPIPE.
fn drain_progress<R: BufRead>(mut reader: R, job: &SimJob<'_>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if let Some(k) = line.trim().strip_prefix("sample:") {
                    debug!(
                        "U={:.1}, mu={:.1}: sample {}/{}",
                        job.u,
                        job.mu,
                        k.trim(),
                        job.nsample
                    );
                }
            }
            Err(e) => {
                debug!("stdout of U={}, mu={} unreadable: {e}", job.u, job.mu);
                let _ = io::copy(&mut reader, &mut io::sink());
                break;
            }
        }
    }
}

/// Deletes the descriptor when the point finishes, whatever the outcome.
struct DescriptorGuard(PathBuf);

impl Drop for DescriptorGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("cannot remove descriptor {}: {e}", self.0.display());
            }
        }
    }
}

/// Outcome of one successfully analysed point.
#[derive(Debug, Clone)]
pub struct PointResult {
    pub u: f64,
    pub mu: f64,
    /// C(nx / 2)
    pub correlation_midpoint: f64,
    pub correlation_midpoint_err: f64,
    pub correlation: CorrelationSeries,
    /// Mean of the thermalized midpoint series
    pub corrected_mean: Option<f64>,
    /// Autocorrelation-corrected error of that mean; `None` when tau_int comes
    /// out negative and the error is undefined
    pub corrected_error: Option<f64>,
    pub tau_int: Option<f64>,
    pub n_eff: Option<f64>,
    pub ntau: i32,
    pub thermalization_skip: usize,
    pub n_samples: usize,
    pub dat_path: PathBuf,
}

/// Per-point switches that do not belong in the persisted config.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointOptions {
    pub skip_autocorrelation: bool,
    /// Worker index, used only for hybrid seeding
    pub process_id: u64,
}

/// Run the full pipeline for one `(u, mu)` point.
pub fn run_single_point(
    u: f64,
    mu: f64,
    config: &Config,
    simulator: &dyn Simulator,
    options: PointOptions,
    cancel: &CancelToken,
) -> Result<PointResult> {
    cancel.check()?;
    let sim = &config.simulation;
    let workdir = config.paths.output_dir.as_path();
    let datfilename = dat_filename(u, mu, &sim.s_end);
    let descriptor_name = params_filename(u, mu);

    if let Some(seed) = config.seed.get_seed(options.process_id)? {
        warn!("seed {seed} requested for U={u}, mu={mu}, but the simulation draws its own");
    }

    {
        let descriptor_path = workdir.join(&descriptor_name);
        let _guard = DescriptorGuard(descriptor_path.clone());
        Descriptor {
            mu,
            u,
            dtau: &sim.dtau,
            ds: &sim.ds,
            s_end: &sim.s_end,
            datfilename: &datfilename,
            nsample: sim.nsample,
        }
        .write(&descriptor_path)?;

        let job = SimJob {
            u,
            mu,
            descriptor: &descriptor_name,
            datfilename: &datfilename,
            workdir,
            nsample: sim.nsample,
        };
        simulator.run(&job, cancel)?;
    }

    let mut result = analyze_dat(workdir.join(&datfilename), options.skip_autocorrelation)?;
    result.u = u;
    result.mu = mu;

    info!(
        "U={u:.1}, mu={mu:.1} done (samples={}, skip={})",
        result.n_samples, result.thermalization_skip
    );
    Ok(result)
}

/// Correlation and error analysis of one existing data file.
///
/// `u` and `mu` are taken from the file header. The autocorrelation stack runs
/// only for series longer than [`MIN_AUTOCORR_SAMPLES`] and only when enough
/// samples remain after burn-in.
pub fn analyze_dat(path: impl AsRef<Path>, skip_autocorrelation: bool) -> Result<PointResult> {
    let dat_path = path.as_ref().to_path_buf();
    let (header, samples) = read_dat(&dat_path)?;
    let nx = header.lattice_size();
    let correlation = correlation_from_samples(&samples, nx)?;
    let (midpoint, midpoint_err) = correlation.midpoint();
    let n_samples = samples.len();

    let mut result = PointResult {
        u: header.u,
        mu: header.mu,
        correlation_midpoint: midpoint,
        correlation_midpoint_err: midpoint_err,
        correlation,
        corrected_mean: None,
        corrected_error: None,
        tau_int: None,
        n_eff: None,
        ntau: header.ntau,
        thermalization_skip: 0,
        n_samples,
        dat_path,
    };

    if !skip_autocorrelation && n_samples > MIN_AUTOCORR_SAMPLES {
        let series = midpoint_series(&samples, nx);
        let skip = detect_thermalization(&series, THERMALIZATION_WINDOW);
        result.thermalization_skip = skip;
        if skip + MIN_SAMPLES_AFTER_SKIP < n_samples {
            let analysis = ErrorAnalysis::new(series[skip..].to_vec())?;
            let errors = analysis.errors();
            result.corrected_mean = Some(analysis.mean());
            if errors.stat_error.is_finite() {
                result.corrected_error = Some(errors.stat_error);
            } else {
                warn!(
                    "{}: corrected error undefined (tau_int = {:.3}), series is anti-correlated",
                    result.dat_path.display(),
                    errors.tau_int
                );
            }
            result.tau_int = Some(errors.tau_int);
            result.n_eff = Some(errors.n_eff);
        }
    }
    Ok(result)
}
