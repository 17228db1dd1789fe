use anyhow::Result;
use colored::*;
use flowcore::validation::{validate_files, ValidationIssue, ValidationLevel, ValidationResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cli::ValidateFormat;
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_WARNING};

#[derive(Debug, Serialize)]
struct JsonValidationResult {
    files_checked: usize,
    errors: usize,
    warnings: usize,
    issues: Vec<JsonValidationIssue>,
}

#[derive(Debug, Serialize)]
struct JsonValidationIssue {
    level: String,
    file_path: String,
    line: Option<usize>,
    column: Option<usize>,
    message: String,
    suggestion: Option<String>,
}

pub struct Validator {
    quiet: bool,
}

impl Validator {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn validate(&self, definition: &Path, plugins: Option<&Path>) -> ValidationResult {
        tracing::debug!(definition = %definition.display(), "Validating workflow");
        validate_files(definition, plugins)
    }

    pub fn print_results(&self, result: &ValidationResult, format: ValidateFormat) -> Result<()> {
        match format {
            ValidateFormat::Text => self.print_text_results(result),
            ValidateFormat::Json => self.print_json_results(result)?,
        }
        Ok(())
    }

    fn print_text_results(&self, result: &ValidationResult) {
        if result.issues.is_empty() {
            if !self.quiet {
                println!(
                    "{} All {} files validated successfully!",
                    "✓".green(),
                    result.files_checked
                );
            }
            return;
        }

        let mut issues_by_file: BTreeMap<&PathBuf, Vec<&ValidationIssue>> = BTreeMap::new();
        for issue in &result.issues {
            issues_by_file.entry(&issue.file_path).or_default().push(issue);
        }

        for (file_path, issues) in issues_by_file {
            if !self.quiet {
                match issues.first().and_then(|issue| issue.content_title.as_ref()) {
                    Some(title) => {
                        println!("\n{}", title.bold());
                        println!("  {}", file_path.display().to_string().dimmed());
                    }
                    None => println!("\n{}", file_path.display().to_string().bold()),
                }
            }

            for issue in issues {
                if self.quiet && issue.level != ValidationLevel::Error {
                    continue;
                }

                let level_str = match issue.level {
                    ValidationLevel::Error => "ERROR".red(),
                    ValidationLevel::Warning => "WARN".yellow(),
                    ValidationLevel::Info => "INFO".blue(),
                };
                let location = match (issue.line, issue.column) {
                    (Some(line), Some(col)) => format!("{}:{}", line, col),
                    (Some(line), None) => line.to_string(),
                    _ => "-".to_string(),
                };

                println!("  {} [{}] {}", level_str, location, issue.message);

                if !self.quiet {
                    if let Some(suggestion) = &issue.suggestion {
                        println!("    hint: {}", suggestion.dimmed());
                    }
                }
            }
        }

        if !self.quiet {
            println!("\n{}", "Summary:".bold());
            println!("  Files checked: {}", result.files_checked);
            if result.errors > 0 {
                println!("  Errors: {}", result.errors.to_string().red());
            }
            if result.warnings > 0 {
                println!("  Warnings: {}", result.warnings.to_string().yellow());
            }

            if result.has_errors() {
                println!("\n{} Validation failed with errors.", "✗".red());
            } else if result.has_warnings() {
                println!("\n{} Validation completed with warnings.", "⚠".yellow());
            } else {
                println!("\n{} Validation passed!", "✓".green());
            }
        }
    }

    fn print_json_results(&self, result: &ValidationResult) -> Result<()> {
        let issues = result
            .issues
            .iter()
            .map(|issue| JsonValidationIssue {
                level: match issue.level {
                    ValidationLevel::Error => "error".to_string(),
                    ValidationLevel::Warning => "warning".to_string(),
                    ValidationLevel::Info => "info".to_string(),
                },
                file_path: issue.file_path.display().to_string(),
                line: issue.line,
                column: issue.column,
                message: issue.message.clone(),
                suggestion: issue.suggestion.clone(),
            })
            .collect();

        let json_result = JsonValidationResult {
            files_checked: result.files_checked,
            errors: result.errors,
            warnings: result.warnings,
            issues,
        };

        println!("{}", serde_json::to_string_pretty(&json_result)?);
        Ok(())
    }
}

/// Exit code for a finished validation
pub fn exit_code(result: &ValidationResult) -> i32 {
    if result.has_errors() {
        EXIT_ERROR
    } else if result.has_warnings() {
        EXIT_WARNING
    } else {
        EXIT_SUCCESS
    }
}

pub fn run_validate_command(
    definition: &Path,
    plugins: Option<&Path>,
    quiet: bool,
    format: ValidateFormat,
) -> Result<i32> {
    let validator = Validator::new(quiet);
    let result = validator.validate(definition, plugins);
    validator.print_results(&result, format)?;
    Ok(exit_code(&result))
}
