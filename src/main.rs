//! `sqm`: run parameter sweeps of the external simulation and analyse its output.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::error;

use sqm::autocorrelation::detect_thermalization;
use sqm::cancel::install_interrupt_handler;
use sqm::collect::collect_dir;
use sqm::config::{Config, RawSweep, SweepConfig};
use sqm::correlation::{correlation_from_samples, midpoint_series};
use sqm::error::{Result, SqmError};
use sqm::error_analysis::{print_error_budget_table, ErrorAnalysis, ErrorBudget};
use sqm::experiment_log::ExperimentLog;
use sqm::fortran_io::read_dat;
use sqm::logging::{init_logging, level_for};
use sqm::report::{format_sweep_table, write_correlation_csv, write_sweep_csv};
use sqm::runner::{ExternalBinary, MIN_AUTOCORR_SAMPLES, THERMALIZATION_WINDOW};
use sqm::sweep::{prepare_run_directory, run_sweep, worker_count, SweepOptions};

#[derive(Parser)]
#[command(name = "sqm")]
#[command(about = "Parameter sweeps and correlation analysis for Monte Carlo simulations")]
#[command(version)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-dimensional sweep over U or mu
    Sweep(SweepArgs),

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Correlation function and error analysis of a single data file
    Analyze {
        file: PathBuf,

        /// Write the correlation function as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        #[arg(long)]
        skip_autocorrelation: bool,
    },

    /// Aggregate the data files of an earlier sweep
    Collect {
        #[arg(default_value = "output")]
        dir: PathBuf,

        /// Write the aggregated sweep as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        #[arg(long)]
        skip_autocorrelation: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print a configuration file after validation
    Show {
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct SweepArgs {
    /// YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fixed U
    #[arg(long = "u")]
    u: Option<f64>,

    /// Fixed mu
    #[arg(long)]
    mu: Option<f64>,

    #[arg(long, requires_all = ["u_end", "u_step"])]
    u_start: Option<f64>,

    #[arg(long, requires_all = ["u_start", "u_step"])]
    u_end: Option<f64>,

    #[arg(long, requires_all = ["u_start", "u_end"])]
    u_step: Option<f64>,

    #[arg(long, requires_all = ["mu_end", "mu_step"])]
    mu_start: Option<f64>,

    #[arg(long, requires_all = ["mu_start", "mu_step"])]
    mu_end: Option<f64>,

    #[arg(long, requires_all = ["mu_start", "mu_end"])]
    mu_step: Option<f64>,

    /// Samples per point (overrides the config)
    #[arg(long)]
    nsample: Option<u32>,

    /// Flow-equation end value as a Fortran literal, e.g. 1d0
    #[arg(long)]
    s_end: Option<String>,

    /// Parallel simulations (default: min(points, CPUs))
    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    fortran_binary: Option<PathBuf>,

    /// Skip burn-in detection and autocorrelation-corrected errors
    #[arg(long)]
    skip_autocorrelation: bool,

    /// Print the plan without running anything
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_progress: bool,
}

impl SweepArgs {
    fn has_axis_flags(&self) -> bool {
        [
            self.u,
            self.mu,
            self.u_start,
            self.u_end,
            self.u_step,
            self.mu_start,
            self.mu_end,
            self.mu_step,
        ]
        .iter()
        .any(Option::is_some)
    }

    fn raw_sweep(&self) -> RawSweep {
        RawSweep {
            U: self.u,
            mu: self.mu,
            U_start: self.u_start,
            U_end: self.u_end,
            U_step: self.u_step,
            mu_start: self.mu_start,
            mu_end: self.mu_end,
            mu_step: self.mu_step,
            ..RawSweep::default()
        }
    }

    /// Config file (or defaults) with the command-line overrides applied.
    fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(n) = self.nsample {
            config.simulation.nsample = n;
        }
        if let Some(s_end) = &self.s_end {
            config.simulation.s_end = s_end.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(binary) = &self.fortran_binary {
            config.paths.fortran_binary = binary.clone();
        }
        if self.has_axis_flags() {
            config.sweep = Some(SweepConfig::try_from(self.raw_sweep())?);
        }
        if config.sweep.is_none() {
            return Err(SqmError::Config(
                "no sweep given: use --mu-start/--mu-end/--mu-step or --u-start/--u-end/--u-step"
                    .into(),
            ));
        }
        config.paths = config.paths.resolved()?;
        Ok(config)
    }
}

fn cmd_sweep(args: &SweepArgs, quiet: bool) -> Result<ExitCode> {
    let config = args.build_config()?;
    let sweep = config
        .sweep
        .as_ref()
        .ok_or_else(|| SqmError::Config("no sweep configured".into()))?;
    let workers = worker_count(sweep.values().len(), args.workers);

    if args.dry_run {
        println!("Dry run: sweep {} ({} points)", sweep.param(), sweep.values().len());
        println!("  Fixed {} = {}", sweep.param().other(), sweep.fixed());
        println!("  Sweep {} = {:?}", sweep.param(), sweep.values());
        println!("  Nsample = {}", config.simulation.nsample);
        println!("  {workers} workers");
        println!("  binary: {}", config.paths.fortran_binary.display());
        return Ok(ExitCode::SUCCESS);
    }

    if !config.paths.fortran_binary.is_file() {
        return Err(SqmError::Config(format!(
            "simulation binary not found: {}",
            config.paths.fortran_binary.display()
        )));
    }

    let config = prepare_run_directory(&config)?;
    let cancel = install_interrupt_handler()?;
    let simulator = Arc::new(ExternalBinary::new(&config.paths.fortran_binary));
    let options = SweepOptions {
        workers: Some(workers),
        skip_autocorrelation: args.skip_autocorrelation,
        show_progress: !args.no_progress && !quiet,
    };

    let result = run_sweep(&config, simulator, options, &cancel)?;
    let param = sweep.param();
    let run_dir = &config.paths.output_dir;

    write_sweep_csv(run_dir.join("results.csv"), param, &result.points)?;
    let log = ExperimentLog::from_sweep(&config, &result)?;
    log.save_json(run_dir.join("experiment_log.json"))?;

    print!("{}", format_sweep_table(param, &result.points));
    println!(
        "\nDone: {} succeeded, {} failed ({:.0}%), {:.1} s",
        result.points.len(),
        result.failed.len(),
        100.0 * result.success_rate(),
        result.walltime_seconds
    );
    println!("Output directory: {}", run_dir.display());
    if !result.failed.is_empty() {
        println!("Failed points:");
        for (u, mu, msg) in &result.failed {
            println!("  U={u}, mu={mu}: {msg}");
        }
    }
    for warning in log.warnings() {
        println!("warning: {warning}");
    }

    if result.interrupted {
        Ok(ExitCode::from(130))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn cmd_analyze(file: &Path, csv: Option<&Path>, skip_autocorrelation: bool) -> Result<()> {
    let (header, samples) = read_dat(file)?;
    let nx = header.lattice_size();
    let correlation = correlation_from_samples(&samples, nx)?;

    println!("{}", file.display());
    println!(
        "  Nx = {}, U = {}, mu = {}, Ntau = {}, samples = {}",
        header.nx,
        header.u,
        header.mu,
        header.ntau,
        samples.len()
    );
    println!("{:>6} {:>16} {:>14}", "x", "C(x)", "err");
    for (x, (m, e)) in correlation.mean.iter().zip(&correlation.err).enumerate() {
        println!("{x:>6} {m:>16.8e} {e:>14.4e}");
    }

    if let Some(path) = csv {
        write_correlation_csv(path, &correlation)?;
        println!("correlation written to {}", path.display());
    }

    if skip_autocorrelation || samples.len() <= MIN_AUTOCORR_SAMPLES {
        return Ok(());
    }
    let series = midpoint_series(&samples, nx);
    let skip = detect_thermalization(&series, THERMALIZATION_WINDOW);
    let trimmed = series.get(skip..).unwrap_or_default().to_vec();
    match ErrorAnalysis::new(trimmed) {
        Ok(analysis) => {
            println!();
            print_error_budget_table(&[ErrorBudget::new("C(N/2)".into(), &analysis, skip)]);
        }
        Err(e) => println!("autocorrelation analysis skipped: {e}"),
    }
    Ok(())
}

fn cmd_collect(dir: &Path, csv: Option<&Path>, skip_autocorrelation: bool) -> Result<()> {
    let collected = collect_dir(dir, skip_autocorrelation)?;
    println!(
        "{} sweep, fixed {} = {} ({} points)",
        collected.param,
        collected.param.other(),
        collected.fixed,
        collected.points.len()
    );
    print!("{}", format_sweep_table(collected.param, &collected.points));
    for (path, msg) in &collected.skipped {
        println!("skipped {}: {msg}", path.display());
    }
    if let Some(path) = csv {
        write_sweep_csv(path, collected.param, &collected.points)?;
        println!("results written to {}", path.display());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Sweep(args) => cmd_sweep(&args, cli.quiet),
        Commands::Config { command } => match command {
            ConfigCommands::Init { output, force } => {
                if output.exists() && !force {
                    return Err(SqmError::Config(format!(
                        "{} already exists (use --force to overwrite)",
                        output.display()
                    )));
                }
                Config::default().to_yaml(&output)?;
                println!("Configuration file created: {}", output.display());
                Ok(ExitCode::SUCCESS)
            }
            ConfigCommands::Show { config } => {
                let cfg = Config::load(&config)?;
                println!("# {}", config.display());
                print!("{}", cfg.to_yaml_string()?);
                Ok(ExitCode::SUCCESS)
            }
        },
        Commands::Analyze { file, csv, skip_autocorrelation } => {
            cmd_analyze(&file, csv.as_deref(), skip_autocorrelation)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Collect { dir, csv, skip_autocorrelation } => {
            cmd_collect(&dir, csv.as_deref(), skip_autocorrelation)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(level_for(cli.verbose, cli.quiet)) {
        eprintln!("warning: {e}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
