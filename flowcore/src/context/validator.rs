//! Schema validators for plugin payloads

use serde_json::Value;
use thiserror::Error;

/// Errors building or running validators
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Only `json-schema` validators exist
    #[error("Validator '{0}' is not supported")]
    Unsupported(String),
    /// The schema itself does not compile
    #[error("Invalid JSON schema: {0}")]
    InvalidSchema(String),
    /// The payload does not satisfy the schema
    #[error("Schema validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A compiled payload validator
#[derive(Debug)]
pub enum Validator {
    /// JSON-schema validation
    JsonSchema(JsonSchemaValidator),
}

impl Validator {
    /// Check `value`, collecting every violation
    pub fn validate(&self, value: &Value) -> Result<(), ValidatorError> {
        match self {
            Validator::JsonSchema(v) => v.validate(value),
        }
    }
}

/// JSON-schema validator
pub struct JsonSchemaValidator {
    schema: Value,
    compiled: jsonschema::Validator,
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl JsonSchemaValidator {
    /// Compile `schema`
    pub fn new(schema: Value) -> Result<Self, ValidatorError> {
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| ValidatorError::InvalidSchema(e.to_string()))?;
        Ok(Self { schema, compiled })
    }

    /// Validate `value` against the compiled schema
    pub fn validate(&self, value: &Value) -> Result<(), ValidatorError> {
        if self.compiled.is_valid(value) {
            return Ok(());
        }
        let errors = self
            .compiled
            .iter_errors(value)
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        Err(ValidatorError::Invalid(errors))
    }
}

/// Build a validator of the named kind
///
/// A missing schema yields `Ok(None)`: no validation at all, which is not the
/// same as a validator that accepts everything.
pub fn fetch_validator(kind: &str, schema: Option<&Value>) -> Result<Option<Validator>, ValidatorError> {
    let Some(schema) = schema else {
        return Ok(None);
    };
    match kind {
        "json-schema" => JsonSchemaValidator::new(schema.clone()).map(|v| Some(Validator::JsonSchema(v))),
        other => Err(ValidatorError::Unsupported(other.to_string())),
    }
}
