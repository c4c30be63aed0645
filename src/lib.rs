pub mod error;
pub mod logging;
pub mod config;
pub mod fortran_io;
pub mod correlation;
pub mod autocorrelation;
pub mod error_analysis;
pub mod cancel;
pub mod runner;
pub mod sweep;
pub mod collect;
pub mod report;
pub mod experiment_log;
