//! Workflow runner: one workflow instance, its context and its plugins

pub mod builder;
pub mod core;
mod invocation;
#[cfg(test)]
mod tests;

pub use builder::WorkflowRunnerBuilder;
pub use self::core::WorkflowRunner;

use crate::plugins::PluginConstructionError;
use crate::secrets::SecretsError;
use crate::workflow::{DefinitionError, InterpreterError};
use thiserror::Error;

/// Errors surfaced by a runner
///
/// Plugin invocation failures are not among them: those are recorded in the
/// context under `pluginsOutput` and reported through notifications.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The definition does not compile
    #[error("Invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),
    /// The interpreter rejected an event or a state
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    /// A plugin could not be built
    #[error("Plugin construction failed: {0}")]
    PluginConstruction(#[from] PluginConstructionError),
    /// Secrets could not be loaded
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    /// Callback events kept triggering each other
    #[error("Callback cascade exceeded the limit of {limit} events")]
    CascadeLimitExceeded {
        /// The configured limit
        limit: usize,
    },
    /// `invoke_plugin` named no registered plugin
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),
    /// The caller supplied a context that is not a JSON object
    #[error("Context must be a JSON object, got {0}")]
    InvalidContext(String),
}

impl RunnerError {
    /// Whether the error is an illegal event for the current state
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, RunnerError::Interpreter(InterpreterError::IllegalTransition { .. }))
    }
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// `status` of a failed API plugin entry in `pluginsOutput`
pub const PLUGIN_STATUS_ERROR: &str = "ERROR";

/// Tag marking failure states; reaching one is logged as a warning
pub const FAILURE_TAG: &str = "failure";
