//! Helpers over JSON field values.
//!
//! Field values are plain [`serde_json::Value`]s. Composite objects that
//! reference a server entity carry an `objectId` (and usually a
//! `className`), which is what list operations use to decide identity.

use crate::error::{CoreError, CoreResult};
use serde_json::{Number, Value};

/// Returns the `(className, objectId)` pair of an entity reference.
fn entity_identity(value: &Value) -> Option<(Option<&str>, &str)> {
    let map = value.as_object()?;
    let id = map.get("objectId")?.as_str()?;
    let class = map.get("className").and_then(Value::as_str);
    Some((class, id))
}

/// Identity comparer used by list operations.
///
/// Two entity references compare by server id (and class name when both
/// carry one). Everything else compares by value equality.
pub fn same_identity(a: &Value, b: &Value) -> bool {
    match (entity_identity(a), entity_identity(b)) {
        (Some((class_a, id_a)), Some((class_b, id_b))) => {
            let same_class = match (class_a, class_b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            };
            same_class && id_a == id_b
        }
        _ => a == b,
    }
}

/// Order-preserving, reference-updating union.
///
/// Walks `additions` in order. An element identical to one already in the
/// accumulating result replaces that slot in place; anything else is
/// appended.
pub fn union(mut base: Vec<Value>, additions: &[Value]) -> Vec<Value> {
    for item in additions {
        match base.iter().position(|existing| same_identity(existing, item)) {
            Some(index) => base[index] = item.clone(),
            None => base.push(item.clone()),
        }
    }
    base
}

/// Removes every element identical to one of `removals`.
pub fn difference(base: Vec<Value>, removals: &[Value]) -> Vec<Value> {
    base.into_iter()
        .filter(|item| !removals.iter().any(|r| same_identity(item, r)))
        .collect()
}

/// Short name of a value's JSON type, for error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Reads an existing value as a list; absent and `null` read as empty.
pub(crate) fn existing_list(value: Option<&Value>, key: &str) -> CoreResult<Vec<Value>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(CoreError::TypeMismatch {
            key: key.to_string(),
            expected: "list",
            found: kind_name(other),
        }),
    }
}

/// Reads an existing value as a number; absent and `null` read as zero.
pub(crate) fn existing_number(value: Option<&Value>, key: &str) -> CoreResult<Number> {
    match value {
        None | Some(Value::Null) => Ok(Number::from(0)),
        Some(Value::Number(n)) => Ok(n.clone()),
        Some(other) => Err(CoreError::TypeMismatch {
            key: key.to_string(),
            expected: "number",
            found: kind_name(other),
        }),
    }
}

/// Adds two JSON numbers, staying in integers when both sides are integers.
pub(crate) fn add_numbers(a: &Number, b: &Number, key: &str) -> CoreResult<Number> {
    let overflow = || CoreError::NumericOverflow {
        key: key.to_string(),
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.checked_add(y).map(Number::from).ok_or_else(overflow);
    }

    let x = a.as_f64().ok_or_else(overflow)?;
    let y = b.as_f64().ok_or_else(overflow)?;
    Number::from_f64(x + y).ok_or_else(overflow)
}
