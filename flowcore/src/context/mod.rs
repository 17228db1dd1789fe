//! Context transform and merge engine
//!
//! Everything in here is a pure function over `serde_json::Value` trees. The
//! runner owns the context; these helpers only compute new values.

pub mod helpers;
pub mod merge;
pub mod transformers;
pub mod validator;

pub use merge::{deep_merge, deep_merge_with_options, merge_to_context, ArrayMergeOption, MergeError};
pub(crate) use merge::type_name;
pub use transformers::{
    apply_transformers, fetch_transformers, Transformer, TransformerError, TransformerSchema,
};
pub use validator::{fetch_validator, Validator, ValidatorError};

use serde_json::{Map, Value};

/// Context key holding per-plugin outputs
pub const PLUGINS_OUTPUT_KEY: &str = "pluginsOutput";

/// Key injected into plugin inputs carrying the runtime config
pub const WORKFLOW_RUNTIME_CONFIG_KEY: &str = "workflowRuntimeConfig";

/// Key injected into plugin inputs carrying the runtime id
pub const WORKFLOW_RUNTIME_ID_KEY: &str = "workflowRuntimeId";

/// Truthiness as understood by JSON-Logic and JMESPath guards
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Shallow merge of two objects, keys of `overlay` winning
///
/// Non-object inputs contribute nothing.
pub fn shallow_merge(base: &Value, overlay: Option<&Value>) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(Value::Object(extra)) = overlay {
        for (key, value) in extra {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Look up a dotted path such as `entity.data.name`
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Set a dotted path, creating (or replacing non-object) intermediate levels
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *value = new_value;
        return;
    };

    let mut current = value;
    for segment in parents {
        current = object_entry(current, segment);
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert((*last).to_string(), new_value);
    }
}

/// Remove a dotted path, returning the removed value
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };
    let parent = match parent_path {
        Some(parent_path) => get_path_mut(value, parent_path)?,
        None => value,
    };
    parent.as_object_mut()?.remove(last)
}

fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.as_object_mut()?.get_mut(segment))
}

/// Descend into `key`, turning `value` into an object when it is not one
pub(crate) fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    match value {
        Value::Object(map) => map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        other => {
            let mut map = Map::new();
            map.insert(key.to_string(), Value::Object(Map::new()));
            *other = Value::Object(map);
            &mut other[key]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!("no")));
    }

    #[test]
    fn test_shallow_merge_payload_wins() {
        let merged = shallow_merge(&json!({"a": 1, "b": {"c": 1}}), Some(&json!({"b": 2})));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
        assert_eq!(shallow_merge(&json!({"a": 1}), None), json!({"a": 1}));
    }

    #[test]
    fn test_path_helpers() {
        let mut value = json!({"entity": {"items": [{"id": "x"}]}});
        assert_eq!(get_path(&value, "entity.items.0.id"), Some(&json!("x")));
        assert_eq!(get_path(&value, "entity.missing"), None);

        set_path(&mut value, "report.data.score", json!(42));
        assert_eq!(value["report"]["data"]["score"], json!(42));

        set_path(&mut value, "entity.items.name", json!("replaced"));
        assert_eq!(value["entity"]["items"], json!({"name": "replaced"}));

        assert_eq!(remove_path(&mut value, "report.data"), Some(json!({"score": 42})));
        assert_eq!(value["report"], json!({}));
        assert_eq!(remove_path(&mut value, "nope.deeper"), None);
    }
}
