//! Exit code constants for CLI commands
//!
//! These constants define the standard exit codes used throughout the application:
//! - 0: Success
//! - 1: Runtime failure (unreadable input, rejected event, warnings)
//! - 2: Validation errors

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Warnings found during validation
pub const EXIT_WARNING: i32 = 1;

/// Runtime failure: unreadable input or a rejected event
pub const EXIT_FAILURE: i32 = 1;

/// Validation errors
pub const EXIT_ERROR: i32 = 2;
