//! flowcore CLI library
//!
//! Command-line definitions, exit codes and validation output, exposed for
//! tests.

/// Command-line interface definitions and argument parsing
pub mod cli;
/// Error type carrying exit codes
pub mod error;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// Tracing setup
pub mod logging;
/// The `run` and `events` commands
pub mod run;
/// Validation of definitions and plugin files
pub mod validate;
