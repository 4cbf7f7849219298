//! Property-based test generators using proptest.
//!
//! Values are kept small and JSON-clean (no floats) so that equality after
//! a wire round trip is exact.

use objsync_core::{FieldOperation, OperationSet};
use proptest::prelude::*;
use serde_json::{json, Number, Value};

/// Strategy for generating field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating class names.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating server object ids.
pub fn object_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9]{10}").expect("Invalid regex")
}

/// Strategy for generating scalar field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000i64..1_000).prop_map(Value::from),
        prop::string::string_regex("[a-z]{0,8}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for generating pointers to other objects.
pub fn pointer_strategy() -> impl Strategy<Value = Value> {
    (class_name_strategy(), object_id_strategy()).prop_map(|(class_name, object_id)| {
        json!({"__type": "Pointer", "className": class_name, "objectId": object_id})
    })
}

/// Strategy for generating list items.
///
/// Drawn from a narrow domain so that duplicates (and therefore the
/// uniqueness rules of `AddUnique` and `Remove`) are exercised often.
pub fn list_item_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => (0i64..6).prop_map(Value::from),
        2 => prop::sample::select(vec!["a", "b", "c"]).prop_map(Value::from),
        1 => (0u8..3).prop_map(|n| {
            json!({"__type": "Pointer", "className": "Item", "objectId": format!("item{n}")})
        }),
    ]
}

/// Strategy for generating lists of items.
pub fn list_strategy() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(list_item_strategy(), 0..5)
}

/// Strategy for generating operations that are valid on a list field.
pub fn list_operation_strategy() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        1 => list_strategy().prop_map(|items| FieldOperation::Set(Value::Array(items))),
        3 => list_strategy().prop_map(FieldOperation::Add),
        3 => list_strategy().prop_map(FieldOperation::AddUnique),
        1 => Just(FieldOperation::Delete),
    ]
}

/// Strategy for generating operations that are valid on a numeric field.
pub fn numeric_operation_strategy() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        1 => (-100i64..100).prop_map(|n| FieldOperation::Set(Value::from(n))),
        3 => (-100i64..100).prop_map(|n| FieldOperation::Increment(Number::from(n))),
        1 => Just(FieldOperation::Delete),
    ]
}

/// Strategy for generating any single operation.
pub fn field_operation_strategy() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        scalar_value_strategy().prop_map(FieldOperation::Set),
        list_strategy().prop_map(FieldOperation::Add),
        list_strategy().prop_map(FieldOperation::AddUnique),
        list_strategy().prop_map(FieldOperation::Remove),
        (-100i64..100).prop_map(|n| FieldOperation::Increment(Number::from(n))),
        Just(FieldOperation::Delete),
    ]
}

/// Strategy for generating operation sets.
pub fn operation_set_strategy() -> impl Strategy<Value = OperationSet> {
    prop::collection::btree_map(field_name_strategy(), field_operation_strategy(), 0..6)
}

/// Strategy for generating server documents of a class.
///
/// Every document carries an `objectId` and a handful of scalar fields.
pub fn object_document_strategy(class_name: &'static str) -> impl Strategy<Value = Value> {
    (
        object_id_strategy(),
        prop::collection::btree_map(field_name_strategy(), scalar_value_strategy(), 0..5),
    )
        .prop_map(move |(object_id, fields)| {
            let mut document: serde_json::Map<String, Value> = fields.into_iter().collect();
            document.insert("objectId".into(), Value::String(object_id));
            document.insert("className".into(), Value::String(class_name.into()));
            Value::Object(document)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generates_valid_names() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let field = field_name_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(!field.is_empty());
            assert!(field.chars().next().unwrap().is_ascii_lowercase());

            let id = object_id_strategy().new_tree(&mut runner).unwrap().current();
            assert_eq!(id.len(), 10);
        }
    }

    proptest! {
        #[test]
        fn list_operations_never_fail_on_lists(ops in prop::collection::vec(list_operation_strategy(), 1..8)) {
            let folded = FieldOperation::fold(ops).unwrap();
            prop_assert!(folded.is_some());
        }

        #[test]
        fn documents_carry_identity(document in object_document_strategy("Item")) {
            prop_assert!(document["objectId"].is_string());
            prop_assert_eq!(&document["className"], "Item");
        }
    }
}
