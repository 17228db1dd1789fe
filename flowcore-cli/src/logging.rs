//! Process-wide tracing setup
//!
//! Logs go to stderr so that `run` can print its snapshot on stdout. An explicit
//! `RUST_LOG` filter wins over the level picked from the flags.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level selected by the verbosity flags
pub fn log_level(quiet: bool, debug: bool, verbose: bool) -> Level {
    if quiet {
        Level::ERROR
    } else if debug {
        Level::DEBUG
    } else if verbose {
        Level::TRACE
    } else {
        Level::WARN
    }
}

/// Install the stderr subscriber
pub fn init(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowcore={level},flowcore_cli={level}")));

    if let Err(e) = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {e}");
    }
}
