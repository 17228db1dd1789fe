use flowcore::context::{deep_merge, deep_merge_with_options, merge_to_context, ArrayMergeOption};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// JSON values without arrays
fn array_free_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z0-9 ]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-c]{1,2}", inner, 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect::<Map<String, Value>>()))
    })
}

fn array_free_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-c]{1,2}", array_free_value(), 0..4)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}

proptest! {
    #[test]
    fn test_merge_to_context_is_idempotent(
        context in array_free_object(),
        path in "[a-c]{1,2}(\\.[a-c]{1,2}){0,2}",
        value in array_free_value(),
    ) {
        let mut once = context.clone();
        merge_to_context(&mut once, value.clone(), &path);
        let mut twice = once.clone();
        merge_to_context(&mut twice, value, &path);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_to_context_leaves_other_branches_alone(
        context in array_free_object(),
        path in "[a-c]{1,2}(\\.[a-c]{1,2}){0,2}",
        value in array_free_value(),
    ) {
        let first = path.split('.').next().unwrap_or_default().to_string();
        let mut merged = context.clone();
        merge_to_context(&mut merged, value, &path);

        for (key, original) in context.as_object().unwrap() {
            if *key != first {
                prop_assert_eq!(&merged[key], original);
            }
        }
    }

    #[test]
    fn test_deep_merge_keeps_target_only_keys(
        source in array_free_object(),
        target in array_free_object(),
    ) {
        let merged = deep_merge(&source, &target);
        let merged = merged.as_object().unwrap();
        for (key, value) in target.as_object().unwrap() {
            if !source.as_object().unwrap().contains_key(key) {
                prop_assert_eq!(&merged[key], value);
            }
        }
        for key in source.as_object().unwrap().keys() {
            prop_assert!(merged.contains_key(key));
        }
    }

    #[test]
    fn test_concat_keeps_every_item(
        left in prop::collection::vec(any::<i32>(), 0..6),
        right in prop::collection::vec(any::<i32>(), 0..6),
    ) {
        let merged = deep_merge_with_options(
            &json!({"items": left}),
            &json!({"items": right}),
            ArrayMergeOption::Concat,
        )
        .unwrap();
        let expected: Vec<i32> = left.iter().chain(&right).copied().collect();
        prop_assert_eq!(merged, json!({"items": expected}));
    }

    #[test]
    fn test_replace_takes_source_array(
        left in prop::collection::vec(any::<i32>(), 0..6),
        right in prop::collection::vec(any::<i32>(), 0..6),
    ) {
        let merged = deep_merge_with_options(
            &json!({"items": left, "keep": 1}),
            &json!({"items": right}),
            ArrayMergeOption::Replace,
        )
        .unwrap();
        prop_assert_eq!(merged, json!({"items": right, "keep": 1}));
    }
}

#[test]
fn test_path_merge_overwrites_arrays_while_context_merge_combines_them() {
    let mut context = json!({"documents": {"list": [{"id": 1}]}});
    merge_to_context(&mut context, json!({"list": [{"id": 2}]}), "documents");
    assert_eq!(context, json!({"documents": {"list": [{"id": 2}]}}));

    let merged = deep_merge_with_options(
        &json!({"documents": {"list": [{"id": 1, "name": "a"}]}}),
        &json!({"documents": {"list": [{"id": 1, "status": "ok"}, {"id": 2}]}}),
        ArrayMergeOption::ById,
    )
    .unwrap();
    assert_eq!(
        merged,
        json!({"documents": {"list": [{"id": 1, "name": "a", "status": "ok"}, {"id": 2}]}})
    );
}
