// logging.rs - tracing subscriber setup for the CLI and tests

use std::sync::{Mutex, PoisonError};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SqmError};

static INITIALIZED: Mutex<bool> = Mutex::new(false);

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `level`. Calling this again is a no-op, so tests and
/// embedding programs can call it freely. Fails only when some other
/// subscriber was installed first.
pub fn init_logging(level: &str) -> Result<()> {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(PoisonError::into_inner);
    if *initialized {
        return Ok(());
    }

    let default_filter = format!("sqm={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .try_init()
        .map_err(|e| SqmError::Runtime(format!("cannot install log subscriber: {e}")))?;

    *initialized = true;
    tracing::debug!("logging initialized (level={level})");
    Ok(())
}

/// Level name for the CLI's `-v` / `-q` flags.
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        init_logging("debug").unwrap();
        init_logging("info").unwrap();
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0, false), "info");
        assert_eq!(level_for(1, false), "debug");
        assert_eq!(level_for(3, false), "trace");
        assert_eq!(level_for(2, true), "warn");
    }
}
