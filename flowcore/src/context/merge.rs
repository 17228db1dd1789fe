//! Deep merge algorithms for workflow context

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the merge engine
#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    /// Array merge strategy name is not recognised
    #[error("Unknown array merge option '{0}', expected one of: by_id, by_index, concat, replace")]
    UnknownArrayMergeOption(String),
    /// Whole-context merges require an object on both sides
    #[error("Cannot deep merge a non-object {0} into the workflow context")]
    NonObjectSource(&'static str),
}

/// How arrays are combined by [`deep_merge_with_options`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMergeOption {
    /// Items sharing an `id` are merged, new items are appended
    #[default]
    ById,
    /// Items at the same position are merged, extra source items are appended
    ByIndex,
    /// Source items are appended after the target items
    Concat,
    /// The source array replaces the target array
    Replace,
}

impl FromStr for ArrayMergeOption {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by_id" | "byId" => Ok(Self::ById),
            "by_index" | "byIndex" => Ok(Self::ByIndex),
            "concat" => Ok(Self::Concat),
            "replace" => Ok(Self::Replace),
            other => Err(MergeError::UnknownArrayMergeOption(other.to_string())),
        }
    }
}

/// Recursively merge `source` into `target`
///
/// Object values recurse, everything else (arrays included) overwrites. Keys of
/// `target` that `source` does not mention survive untouched.
pub fn deep_merge(source: &Value, target: &Value) -> Value {
    match (source, target) {
        (Value::Object(source_map), Value::Object(target_map)) => {
            let mut output = target_map.clone();
            for (key, source_value) in source_map {
                let merged = match (source_value, target_map.get(key)) {
                    (Value::Object(_), Some(existing @ Value::Object(_))) => {
                        deep_merge(source_value, existing)
                    }
                    _ => source_value.clone(),
                };
                output.insert(key.clone(), merged);
            }
            Value::Object(output)
        }
        _ => target.clone(),
    }
}

/// Merge `information` into `context` at the dotted `path`
///
/// Missing levels are created. A non-object value standing in the way is
/// replaced by an empty object. When `information` is not an object it simply
/// overwrites the leaf. A blank path targets the root, which only accepts
/// objects; anything else is dropped with a warning.
pub fn merge_to_context(context: &mut Value, information: Value, path: &str) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() && !information.is_object() {
        tracing::warn!(
            path,
            kind = type_name(&information),
            "Refusing to replace the whole context with a non-object value"
        );
        return;
    }
    let mut current = context;

    for segment in &segments {
        let needs_reset = match current.get(*segment) {
            None | Some(Value::Null) => false,
            Some(existing) => !existing.is_object(),
        };
        if needs_reset {
            tracing::warn!(path, segment, "Replacing non-object value while merging into context");
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = super::object_entry(current, segment);
        if needs_reset || current.is_null() {
            *current = Value::Object(Map::new());
        }
    }

    *current = if information.is_object() {
        deep_merge(&information, current)
    } else {
        information
    };
}

/// Deep merge `source` into `target` with a configurable array strategy
pub fn deep_merge_with_options(
    target: &Value,
    source: &Value,
    option: ArrayMergeOption,
) -> Result<Value, MergeError> {
    if !source.is_object() {
        return Err(MergeError::NonObjectSource(type_name(source)));
    }
    Ok(merge_values(target, source, option))
}

fn merge_values(target: &Value, source: &Value, option: ArrayMergeOption) -> Value {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            let mut output = target_map.clone();
            for (key, source_value) in source_map {
                let merged = match target_map.get(key) {
                    Some(existing) => merge_values(existing, source_value, option),
                    None => source_value.clone(),
                };
                output.insert(key.clone(), merged);
            }
            Value::Object(output)
        }
        (Value::Array(target_items), Value::Array(source_items)) => {
            Value::Array(merge_arrays(target_items, source_items, option))
        }
        _ => source.clone(),
    }
}

fn merge_arrays(target: &[Value], source: &[Value], option: ArrayMergeOption) -> Vec<Value> {
    match option {
        ArrayMergeOption::Replace => source.to_vec(),
        ArrayMergeOption::Concat => target.iter().chain(source).cloned().collect(),
        ArrayMergeOption::ByIndex => {
            let mut output = target.to_vec();
            for (index, item) in source.iter().enumerate() {
                match output.get_mut(index) {
                    Some(existing) => *existing = merge_values(existing, item, option),
                    None => output.push(item.clone()),
                }
            }
            output
        }
        ArrayMergeOption::ById => {
            let mut output = target.to_vec();
            for item in source {
                let position = item_id(item).and_then(|id| {
                    output.iter().position(|existing| item_id(existing) == Some(id))
                });
                match position {
                    Some(index) => output[index] = merge_values(&output[index], item, option),
                    None => output.push(item.clone()),
                }
            }
            output
        }
    }
}

fn item_id(item: &Value) -> Option<&Value> {
    item.get("id").filter(|id| !id.is_null())
}

/// JSON type name of `value`, for error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_keeps_unmentioned_keys() {
        let target = json!({"a": {"b": 1, "c": 2}, "keep": true});
        let source = json!({"a": {"b": 10, "d": [1]}});
        assert_eq!(
            deep_merge(&source, &target),
            json!({"a": {"b": 10, "c": 2, "d": [1]}, "keep": true})
        );
    }

    #[test]
    fn test_deep_merge_arrays_overwrite() {
        let merged = deep_merge(&json!({"list": [3]}), &json!({"list": [1, 2]}));
        assert_eq!(merged, json!({"list": [3]}));
    }

    #[test]
    fn test_merge_to_context_creates_path() {
        let mut context = json!({"other": 1});
        merge_to_context(&mut context, json!({"score": 42}), "report.data");
        assert_eq!(context, json!({"other": 1, "report": {"data": {"score": 42}}}));
    }

    #[test]
    fn test_merge_to_context_replaces_non_object_intermediate() {
        let mut context = json!({"report": "pending"});
        merge_to_context(&mut context, json!({"score": 1}), "report.data");
        assert_eq!(context, json!({"report": {"data": {"score": 1}}}));
    }

    #[test]
    fn test_merge_to_context_scalar_overwrites_leaf() {
        let mut context = json!({"report": {"data": {"old": true}}});
        merge_to_context(&mut context, json!("done"), "report.data");
        assert_eq!(context, json!({"report": {"data": "done"}}));
    }

    #[test]
    fn test_merge_to_context_root_only_accepts_objects() {
        let mut context = json!({"keep": 1});
        merge_to_context(&mut context, json!("oops"), "");
        merge_to_context(&mut context, json!([1, 2]), ".");
        assert_eq!(context, json!({"keep": 1}));

        merge_to_context(&mut context, json!({"added": true}), "");
        assert_eq!(context, json!({"keep": 1, "added": true}));
    }

    #[test]
    fn test_merge_to_context_is_idempotent() {
        let mut once = json!({"a": {"x": 1}});
        merge_to_context(&mut once, json!({"y": {"z": 2}}), "a");
        let mut twice = once.clone();
        merge_to_context(&mut twice, json!({"y": {"z": 2}}), "a");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_array_merge_strategies() {
        let target = json!({"docs": [{"id": "a", "v": 1}, {"id": "b", "v": 1}]});
        let source = json!({"docs": [{"id": "b", "v": 2}, {"id": "c", "v": 3}]});

        let by_id = deep_merge_with_options(&target, &source, ArrayMergeOption::ById).unwrap();
        assert_eq!(
            by_id["docs"],
            json!([{"id": "a", "v": 1}, {"id": "b", "v": 2}, {"id": "c", "v": 3}])
        );

        let by_index =
            deep_merge_with_options(&target, &source, ArrayMergeOption::ByIndex).unwrap();
        assert_eq!(
            by_index["docs"],
            json!([{"id": "b", "v": 2}, {"id": "c", "v": 3}])
        );

        let concat = deep_merge_with_options(&target, &source, ArrayMergeOption::Concat).unwrap();
        assert_eq!(concat["docs"].as_array().map(Vec::len), Some(4));

        let replace =
            deep_merge_with_options(&target, &source, ArrayMergeOption::Replace).unwrap();
        assert_eq!(replace["docs"], source["docs"]);
    }

    #[test]
    fn test_deep_merge_with_options_rejects_non_object() {
        assert_eq!(
            deep_merge_with_options(&json!({}), &json!([1]), ArrayMergeOption::Concat),
            Err(MergeError::NonObjectSource("array"))
        );
    }

    #[test]
    fn test_array_merge_option_parsing() {
        assert_eq!("concat".parse::<ArrayMergeOption>(), Ok(ArrayMergeOption::Concat));
        assert_eq!("byId".parse::<ArrayMergeOption>(), Ok(ArrayMergeOption::ById));
        assert!("zip".parse::<ArrayMergeOption>().is_err());
    }
}
