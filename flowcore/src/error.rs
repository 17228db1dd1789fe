//! Unified error handling for the flowcore library
//!
//! Each layer has its own error enum. [`FlowCoreError`] is the umbrella used by
//! callers that load documents from disk and drive runners in one place.

use crate::config::ConfigError;
use crate::workflow::{DefinitionError, RunnerError};
use std::fmt;
use thiserror::Error;

/// The main error type for the flowcore library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowCoreError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The state chart document is invalid
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A runner failed to build or to process an event
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Error with additional context
    #[error("{message}")]
    Context {
        /// Context message
        message: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for flowcore operations
pub type Result<T> = std::result::Result<T, FlowCoreError>;

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, msg: S) -> Result<T>;

    /// Add context with a closure that's only called on error
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<S: Into<String>>(self, msg: S) -> Result<T> {
        self.map_err(|e| FlowCoreError::Context {
            message: msg.into(),
            source: Box::new(e),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| FlowCoreError::Context {
            message: f().into(),
            source: Box::new(e),
        })
    }
}

/// Error chain formatter for detailed error reporting
pub struct ErrorChain<'a>(&'a dyn std::error::Error);

impl ErrorChain<'_> {
    /// Every message in the chain on one line, joined by `": "`
    pub fn single_line(&self) -> String {
        let mut line = self.0.to_string();
        let mut current = self.0.source();
        while let Some(err) = current {
            line.push_str(": ");
            line.push_str(&err.to_string());
            current = err.source();
        }
        line
    }
}

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.0)?;

        let mut current = self.0.source();
        let mut level = 1;

        while let Some(err) = current {
            writeln!(f, "{:indent$}Caused by: {}", "", err, indent = level * 2)?;
            current = err.source();
            level += 1;
        }

        Ok(())
    }
}

/// Extension trait for error types to format the full error chain
pub trait ErrorChainExt {
    /// Format the full error chain
    fn error_chain(&self) -> ErrorChain<'_>;
}

impl<E: std::error::Error> ErrorChainExt for E {
    fn error_chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowDefinition;
    use std::io;

    #[test]
    fn test_error_context() {
        let err: Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "file not found").into());
        let err_with_context = err.context("Failed to open definition");

        let msg = err_with_context.unwrap_err().to_string();
        assert!(msg.contains("Failed to open definition"));
    }

    #[test]
    fn test_error_chain_display() {
        let definition_error = WorkflowDefinition::from_json_str("{").unwrap_err();
        let err = FlowCoreError::Context {
            message: "Failed to load workflow".to_string(),
            source: Box::new(definition_error),
        };

        let chain = err.error_chain().to_string();
        assert!(chain.contains("Failed to load workflow"));
        assert!(chain.contains("Caused by"));
    }

    #[test]
    fn test_error_chain_single_line() {
        let err = Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "no such file"))
            .context("Failed to read plugins file p.json")
            .unwrap_err();

        assert_eq!(
            err.error_chain().single_line(),
            "Failed to read plugins file p.json: no such file"
        );
    }
}
