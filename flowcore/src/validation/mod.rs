//! Validation of workflow definitions and their plugin extensions
//!
//! Validation never stops at the first problem: every check contributes
//! issues to a [`ValidationResult`], which callers render as text or JSON.

use crate::error::{ErrorChainExt, ErrorContext};
use crate::plugins::{
    PluginExtensions, PluginRegistry, RegistryContext, ReqwestTransport, UnavailableCallbacks,
};
use crate::workflow::{Machine, WorkflowDefinition};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Represents the severity level of a validation issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// The workflow cannot run
    Error,
    /// The workflow runs but probably not as intended
    Warning,
    /// Informational
    Info,
}

/// A single validation issue found during validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Severity level of the issue
    pub level: ValidationLevel,
    /// File the issue was found in
    pub file_path: PathBuf,
    /// Definition id, when known
    pub content_title: Option<String>,
    /// Line number where the issue occurs
    pub line: Option<usize>,
    /// Column number where the issue occurs
    pub column: Option<usize>,
    /// Description of the issue
    pub message: String,
    /// Suggested fix for the issue
    pub suggestion: Option<String>,
}

/// Result of a validation operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    /// All issues found during validation
    pub issues: Vec<ValidationIssue>,
    /// Number of files checked
    pub files_checked: usize,
    /// Count of error-level issues
    pub errors: usize,
    /// Count of warning-level issues
    pub warnings: usize,
}

impl ValidationResult {
    /// Creates a new empty validation result
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an issue to the validation result
    pub fn add_issue(&mut self, issue: ValidationIssue) {
        match issue.level {
            ValidationLevel::Error => self.errors += 1,
            ValidationLevel::Warning => self.warnings += 1,
            ValidationLevel::Info => {}
        }
        self.issues.push(issue);
    }

    /// Add several issues
    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.add_issue(issue);
        }
    }

    /// Checks if there are any error-level issues
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Checks if there are any warning-level issues
    pub fn has_warnings(&self) -> bool {
        self.warnings > 0
    }

    /// Merges another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.files_checked += other.files_checked;
        self.errors += other.errors;
        self.warnings += other.warnings;
        self.issues.extend(other.issues);
    }
}

/// Something that can report its own validation issues
pub trait Validatable {
    /// Collect issues; `source_path` is reported in each issue when given
    fn validate(&self, source_path: Option<&Path>) -> Vec<ValidationIssue>;
}

/// A definition paired with the plugins declared for it
pub struct WorkflowBundle<'a> {
    /// State chart
    pub definition: &'a WorkflowDefinition,
    /// Plugin schemas
    pub extensions: &'a PluginExtensions,
}

impl Validatable for WorkflowBundle<'_> {
    /// Checks the definition, then builds every plugin offline
    ///
    /// Injected callbacks are replaced by [`UnavailableCallbacks`] so that only
    /// schema problems surface.
    fn validate(&self, source_path: Option<&Path>) -> Vec<ValidationIssue> {
        let mut issues = self.definition.validate(source_path);
        if self.extensions.is_empty() {
            return issues;
        }

        let file_path = source_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(self.definition.name()));
        let error = |message: String| ValidationIssue {
            level: ValidationLevel::Error,
            file_path: file_path.clone(),
            content_title: self.definition.id.clone(),
            line: None,
            column: None,
            message,
            suggestion: None,
        };

        let Ok(machine) = Machine::new(self.definition, 1) else {
            // the definition issues already explain why
            return issues;
        };
        let transport = match ReqwestTransport::new(Duration::from_secs(1)) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                issues.push(error(e.to_string()));
                return issues;
            }
        };

        let callbacks = Arc::new(UnavailableCallbacks);
        let config = Value::Null;
        let ctx = RegistryContext {
            runtime_id: "validation",
            runtime_config: &config,
            machine: &machine,
            secrets: Arc::new(HashMap::new()),
            transport,
            risk_rules: Some(callbacks.clone()),
            child_workflow: Some(callbacks.clone()),
            workflow_token: Some(callbacks),
        };
        if let Err(e) = PluginRegistry::build(self.extensions, Vec::new(), &ctx) {
            issues.push(error(format!("Invalid plugin configuration: {e}")));
        }
        issues
    }
}

/// Validate a definition file and an optional plugin extensions file
pub fn validate_files(definition_path: &Path, plugins_path: Option<&Path>) -> ValidationResult {
    let mut result = ValidationResult::new();
    let issue = |path: &Path, message: String| ValidationIssue {
        level: ValidationLevel::Error,
        file_path: path.to_path_buf(),
        content_title: None,
        line: None,
        column: None,
        message,
        suggestion: None,
    };

    result.files_checked += 1;
    let definition = match WorkflowDefinition::from_file(definition_path) {
        Ok(definition) => definition,
        Err(e) => {
            result.add_issue(issue(definition_path, e.to_string()));
            return result;
        }
    };

    let extensions = match plugins_path {
        Some(path) => {
            result.files_checked += 1;
            match load_extensions(path) {
                Ok(extensions) => extensions,
                Err(e) => {
                    result.add_issue(issue(path, e.error_chain().single_line()));
                    return result;
                }
            }
        }
        None => PluginExtensions::default(),
    };

    let bundle = WorkflowBundle {
        definition: &definition,
        extensions: &extensions,
    };
    result.extend(bundle.validate(Some(definition_path)));
    result
}

/// Read plugin extensions from a JSON or YAML file
pub fn load_extensions(path: &Path) -> crate::Result<PluginExtensions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plugins file {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid plugins file {}", path.display())),
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Invalid plugins file {}", path.display())),
    }
}
