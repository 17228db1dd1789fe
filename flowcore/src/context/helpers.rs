//! Helper transformer methods
//!
//! A helper transformer is a list of `{source, target, method, options}`
//! mappings applied in order to a copy of the input.

use super::transformers::{search, TransformerError};
use super::{get_path, remove_path, set_path, shallow_merge};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Supported helper methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperMethod {
    /// Extract the first regex match (or first capture group) from a string
    Regex,
    /// Delete the source path
    Remove,
    /// Shallow-merge a value into every item of an array
    MergeArrayEachItemWithValue,
    /// Stamp the current UTC time
    SetTimeToRecordUtc,
}

impl FromStr for HelperMethod {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regex" => Ok(Self::Regex),
            "remove" => Ok(Self::Remove),
            "mergeArrayEachItemWithValue" => Ok(Self::MergeArrayEachItemWithValue),
            "setTimeToRecordUTC" => Ok(Self::SetTimeToRecordUtc),
            other => Err(TransformerError::UnknownHelper(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHelperMapping {
    source: String,
    target: Option<String>,
    method: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Debug, Clone)]
enum HelperStep {
    Regex {
        source: String,
        target: String,
        pattern: Regex,
    },
    Remove {
        source: String,
    },
    MergeArrayEachItemWithValue {
        target: String,
        map_jmespath: String,
        merge_with_jmespath: String,
    },
    SetTimeToRecordUtc {
        target: String,
    },
}

/// Compiled list of helper mappings
#[derive(Debug, Clone)]
pub struct HelpersTransformer {
    steps: Vec<HelperStep>,
}

fn invalid(message: impl Into<String>) -> TransformerError {
    TransformerError::InvalidMapping {
        transformer: "helper",
        message: message.into(),
    }
}

fn option_str(options: &Option<Value>, key: &str) -> Option<String> {
    options
        .as_ref()
        .and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl HelpersTransformer {
    /// Compile helper mappings; unknown methods and bad patterns are rejected
    pub fn new(mapping: &Value) -> Result<Self, TransformerError> {
        let raw: Vec<RawHelperMapping> =
            serde_json::from_value(mapping.clone()).map_err(|e| invalid(e.to_string()))?;

        let steps = raw
            .into_iter()
            .map(|m| {
                let method: HelperMethod = m.method.parse()?;
                let target = m.target.clone().unwrap_or_else(|| m.source.clone());
                Ok(match method {
                    HelperMethod::Regex => {
                        let expression = option_str(&m.options, "expression")
                            .or_else(|| m.value.as_ref().and_then(Value::as_str).map(str::to_string))
                            .ok_or_else(|| invalid("regex helper requires an expression"))?;
                        let pattern = Regex::new(&expression).map_err(|e| invalid(e.to_string()))?;
                        HelperStep::Regex {
                            source: m.source,
                            target,
                            pattern,
                        }
                    }
                    HelperMethod::Remove => HelperStep::Remove { source: m.source },
                    HelperMethod::MergeArrayEachItemWithValue => {
                        let map_jmespath = option_str(&m.options, "mapJmespath")
                            .ok_or_else(|| invalid("mergeArrayEachItemWithValue requires mapJmespath"))?;
                        let merge_with_jmespath = option_str(&m.options, "mergeWithJmespath")
                            .ok_or_else(|| {
                                invalid("mergeArrayEachItemWithValue requires mergeWithJmespath")
                            })?;
                        for expression in [&map_jmespath, &merge_with_jmespath] {
                            jmespath::compile(expression).map_err(|e| invalid(e.to_string()))?;
                        }
                        HelperStep::MergeArrayEachItemWithValue {
                            target,
                            map_jmespath,
                            merge_with_jmespath,
                        }
                    }
                    HelperMethod::SetTimeToRecordUtc => HelperStep::SetTimeToRecordUtc { target },
                })
            })
            .collect::<Result<Vec<_>, TransformerError>>()?;

        Ok(Self { steps })
    }

    /// Apply every mapping in order to a copy of `input`
    pub fn transform(&self, input: &Value) -> Result<Value, TransformerError> {
        let mut output = input.clone();
        for step in &self.steps {
            match step {
                HelperStep::Regex {
                    source,
                    target,
                    pattern,
                } => {
                    let extracted = get_path(&output, source)
                        .and_then(Value::as_str)
                        .and_then(|text| pattern.captures(text))
                        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                        .map(|m| Value::String(m.as_str().to_string()))
                        .unwrap_or(Value::Null);
                    set_path(&mut output, target, extracted);
                }
                HelperStep::Remove { source } => {
                    remove_path(&mut output, source);
                }
                HelperStep::MergeArrayEachItemWithValue {
                    target,
                    map_jmespath,
                    merge_with_jmespath,
                } => {
                    let items = search(map_jmespath, &output)?;
                    let merge_with = search(merge_with_jmespath, &output)?;
                    let Value::Array(items) = items else {
                        return Err(TransformerError::Failed {
                            transformer: "helper",
                            message: format!("'{map_jmespath}' did not produce an array"),
                        });
                    };
                    let merged = items
                        .iter()
                        .map(|item| shallow_merge(item, Some(&merge_with)))
                        .collect();
                    set_path(&mut output, target, Value::Array(merged));
                }
                HelperStep::SetTimeToRecordUtc { target } => {
                    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                    set_path(&mut output, target, Value::String(now));
                }
            }
        }
        Ok(output)
    }
}
