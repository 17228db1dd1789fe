//! Context transformers
//!
//! A transformer is a pure `context -> context'` function. Plugins chain them
//! to shape request payloads, response bodies and dispatched events.

use super::helpers::HelpersTransformer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors building or applying transformers
#[derive(Debug, Error)]
pub enum TransformerError {
    /// The `transformer` name is not one of `jmespath` or `helper`
    #[error("Transformer '{0}' is not supported")]
    Unsupported(String),
    /// The mapping could not be compiled
    #[error("Invalid {transformer} mapping: {message}")]
    InvalidMapping {
        /// Transformer kind owning the mapping
        transformer: &'static str,
        /// Compiler or parser message
        message: String,
    },
    /// A helper mapping names an unknown method
    #[error("Unknown helper method '{0}'")]
    UnknownHelper(String),
    /// Applying a transformer failed at runtime
    #[error("{transformer} transformation failed: {message}")]
    Failed {
        /// Transformer kind that failed
        transformer: &'static str,
        /// What went wrong
        message: String,
    },
}

/// Serializable transformer entry as found in plugin schemas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerSchema {
    /// Transformer kind: `jmespath` or `helper`
    pub transformer: String,
    /// JMESPath expression string or list of helper mappings
    pub mapping: Value,
}

/// A compiled transformer
#[derive(Debug, Clone)]
pub enum Transformer {
    /// Reshape the input with a JMESPath expression
    Jmespath(JmespathTransformer),
    /// Apply helper methods to paths of the input
    Helpers(HelpersTransformer),
}

impl Transformer {
    /// Apply this transformer to `input`
    pub fn transform(&self, input: &Value) -> Result<Value, TransformerError> {
        match self {
            Transformer::Jmespath(t) => t.transform(input),
            Transformer::Helpers(t) => t.transform(input),
        }
    }
}

/// JMESPath-backed transformer
#[derive(Debug, Clone)]
pub struct JmespathTransformer {
    expression: String,
}

impl JmespathTransformer {
    /// Compile an expression, collapsing whitespace runs the way multi-line
    /// mappings are written in definitions
    pub fn new(mapping: &str) -> Result<Self, TransformerError> {
        let expression = mapping.split_whitespace().collect::<Vec<_>>().join(" ");
        jmespath::compile(&expression).map_err(|e| TransformerError::InvalidMapping {
            transformer: "jmespath",
            message: e.to_string(),
        })?;
        Ok(Self { expression })
    }

    /// The normalised expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate the expression against `input`
    pub fn transform(&self, input: &Value) -> Result<Value, TransformerError> {
        search(&self.expression, input)
    }
}

/// Evaluate a JMESPath expression and convert the result back to JSON
pub(crate) fn search(expression: &str, input: &Value) -> Result<Value, TransformerError> {
    let failed = |message: String| TransformerError::Failed {
        transformer: "jmespath",
        message,
    };
    let compiled = jmespath::compile(expression).map_err(|e| failed(e.to_string()))?;
    let result = compiled.search(input).map_err(|e| failed(e.to_string()))?;
    serde_json::to_value(&*result).map_err(|e| failed(e.to_string()))
}

/// Evaluate a JMESPath expression for truthiness
pub(crate) fn search_truthy(expression: &str, input: &Value) -> Result<bool, TransformerError> {
    let failed = |message: String| TransformerError::Failed {
        transformer: "jmespath",
        message,
    };
    let compiled = jmespath::compile(expression).map_err(|e| failed(e.to_string()))?;
    let result = compiled.search(input).map_err(|e| failed(e.to_string()))?;
    Ok(result.is_truthy())
}

/// Build a transformer chain from its serializable form
///
/// Unsupported transformer kinds fail here, never at invocation time.
pub fn fetch_transformers(schemas: &[TransformerSchema]) -> Result<Vec<Transformer>, TransformerError> {
    schemas
        .iter()
        .map(|schema| match schema.transformer.as_str() {
            "jmespath" => {
                let mapping = schema.mapping.as_str().ok_or_else(|| TransformerError::InvalidMapping {
                    transformer: "jmespath",
                    message: "mapping must be a string expression".to_string(),
                })?;
                JmespathTransformer::new(mapping).map(Transformer::Jmespath)
            }
            "helper" => HelpersTransformer::new(&schema.mapping).map(Transformer::Helpers),
            other => Err(TransformerError::Unsupported(other.to_string())),
        })
        .collect()
}

/// Run `input` through a chain, feeding each output to the next transformer
///
/// An empty chain returns the input unchanged.
pub fn apply_transformers(transformers: &[Transformer], input: &Value) -> Result<Value, TransformerError> {
    transformers
        .iter()
        .try_fold(input.clone(), |current, transformer| transformer.transform(&current))
}
