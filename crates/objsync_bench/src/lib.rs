//! Benchmark utilities.

use objsync_core::{FieldOperation, ObjectState, OperationSet};
use serde_json::{json, Number, Value};

/// A repeating sequence of list edits on one field.
pub fn list_edits(count: usize) -> Vec<FieldOperation> {
    (0..count)
        .map(|i| match i % 3 {
            0 => FieldOperation::Add(vec![json!(i), json!("x")]),
            1 => FieldOperation::AddUnique(vec![json!(i % 7), json!("x")]),
            _ => FieldOperation::Add(vec![json!({"__type": "Pointer", "className": "Item", "objectId": format!("o{i}")})]),
        })
        .collect()
}

/// A sequence of increments on one field.
pub fn increments(count: usize) -> Vec<FieldOperation> {
    (0..count)
        .map(|i| FieldOperation::Increment(Number::from(i as i64 % 5 - 2)))
        .collect()
}

/// A state with `fields` numeric, string and list fields.
pub fn wide_state(fields: usize) -> ObjectState {
    let mut document = serde_json::Map::new();
    document.insert("objectId".into(), json!("bench0001"));
    for i in 0..fields {
        let value = match i % 3 {
            0 => json!(i),
            1 => json!(format!("value {i}")),
            _ => json!([i, i + 1, i + 2]),
        };
        document.insert(format!("field{i}"), value);
    }
    ObjectState::from_json("Bench", Value::Object(document)).unwrap_or_default()
}

/// An operation set touching every field of [`wide_state`].
pub fn wide_operations(fields: usize) -> OperationSet {
    (0..fields)
        .map(|i| {
            let op = match i % 3 {
                0 => FieldOperation::Increment(Number::from(1)),
                1 => FieldOperation::Set(json!(format!("new {i}"))),
                _ => FieldOperation::AddUnique(vec![json!(i), json!(i + 10)]),
            };
            (format!("field{i}"), op)
        })
        .collect()
}

/// An object event frame carrying an object with `fields` fields.
pub fn object_event_frame(fields: usize) -> Vec<u8> {
    let mut object = serde_json::Map::new();
    object.insert("objectId".into(), json!("bench0001"));
    object.insert("className".into(), json!("Bench"));
    for i in 0..fields {
        object.insert(format!("field{i}"), json!(format!("value {i}")));
    }
    json!({"op": "update", "requestId": 1, "object": object})
        .to_string()
        .into_bytes()
}
