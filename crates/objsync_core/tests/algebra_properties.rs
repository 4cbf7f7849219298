//! Property tests for the field operation algebra.

use objsync_core::{Applied, FieldOperation, RemoteObject};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_item() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..6).prop_map(|n| json!(n)),
        "[a-d]".prop_map(Value::String),
        ("[a-c]", 0u8..3).prop_map(|(id, rev)| json!({
            "className": "Item",
            "objectId": id,
            "rev": rev,
        })),
    ]
}

fn arb_list() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(arb_item(), 0..5)
}

fn arb_list_op() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        arb_list().prop_map(|xs| FieldOperation::Set(Value::Array(xs))),
        arb_list().prop_map(FieldOperation::Add),
        arb_list().prop_map(FieldOperation::AddUnique),
        Just(FieldOperation::Delete),
    ]
}

fn arb_numeric_op() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        (-100i64..100).prop_map(|n| FieldOperation::Set(json!(n))),
        (-100i64..100).prop_map(|n| FieldOperation::Increment(n.into())),
        Just(FieldOperation::Delete),
    ]
}

fn arb_any_op() -> impl Strategy<Value = FieldOperation> {
    prop_oneof![
        arb_list_op(),
        arb_list().prop_map(FieldOperation::Remove),
        (-100i64..100).prop_map(|n| FieldOperation::Increment(n.into())),
    ]
}

fn queue_all(ops: &[FieldOperation]) -> Option<FieldOperation> {
    let mut obj = RemoteObject::new("Item");
    for op in ops {
        let result = match op.clone() {
            FieldOperation::Set(v) => obj.set("field", v),
            FieldOperation::Add(xs) => obj.add("field", xs),
            FieldOperation::AddUnique(xs) => obj.add_unique("field", xs),
            FieldOperation::Delete => obj.delete("field"),
            FieldOperation::Increment(n) => obj.increment("field", n.as_i64().unwrap()),
            FieldOperation::Remove(xs) => obj.remove_all("field", xs),
        };
        result.unwrap();
    }
    obj.current_operations().get("field").cloned()
}

proptest! {
    #[test]
    fn incremental_queueing_matches_one_pass_fold(ops in prop::collection::vec(arb_list_op(), 1..8)) {
        let folded = FieldOperation::fold(ops.clone()).unwrap();
        prop_assert_eq!(queue_all(&ops), folded);
    }

    #[test]
    fn numeric_queueing_matches_one_pass_fold(ops in prop::collection::vec(arb_numeric_op(), 1..8)) {
        let folded = FieldOperation::fold(ops.clone()).unwrap();
        prop_assert_eq!(queue_all(&ops), folded);
    }

    #[test]
    fn fold_can_resume_from_any_split(
        ops in prop::collection::vec(arb_any_op(), 1..8),
        split in 0usize..8,
    ) {
        let split = split.min(ops.len());
        let whole = FieldOperation::fold(ops.clone());

        let resumed = FieldOperation::fold(ops[..split].to_vec()).and_then(|prefix| {
            let mut merged = prefix;
            for op in ops[split..].iter().cloned() {
                merged = Some(op.merge_with_previous(merged.as_ref())?);
            }
            Ok(merged)
        });

        match (whole, resumed) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            (a, b) => prop_assert!(false, "fold disagreed: {:?} vs {:?}", a, b),
        }
    }

    #[test]
    fn delete_always_yields_marker(old in prop::option::of(arb_item())) {
        prop_assert_eq!(
            FieldOperation::Delete.apply(old.as_ref(), "field").unwrap(),
            Applied::Deleted
        );
    }

    #[test]
    fn add_unique_is_idempotent(base in arb_list(), xs in arb_list()) {
        let op = FieldOperation::AddUnique(xs);
        let once = match op.apply(Some(&Value::Array(base)), "field").unwrap() {
            Applied::Value(v) => v,
            Applied::Deleted => unreachable!(),
        };
        let twice = match op.apply(Some(&once), "field").unwrap() {
            Applied::Value(v) => v,
            Applied::Deleted => unreachable!(),
        };
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn add_preserves_order_and_duplicates(base in arb_list(), xs in arb_list()) {
        let applied = FieldOperation::Add(xs.clone())
            .apply(Some(&Value::Array(base.clone())), "field")
            .unwrap();
        let mut expected = base;
        expected.extend(xs);
        prop_assert_eq!(applied, Applied::Value(Value::Array(expected)));
    }

    #[test]
    fn wire_round_trip_applies_identically(op in arb_any_op(), base in arb_list()) {
        let decoded = FieldOperation::decode(op.encode()).unwrap();
        let base = Value::Array(base);
        prop_assert_eq!(
            decoded.apply(Some(&base), "field").ok(),
            op.apply(Some(&base), "field").ok()
        );
    }
}
