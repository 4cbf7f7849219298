//! Field operations.
//!
//! A [`FieldOperation`] is one deferred mutation to one field of a remote
//! object. Operations queued on the same field before a flush are merged into
//! a single equivalent operation with [`FieldOperation::merge_with_previous`];
//! the merged operation is later sent over the wire and/or applied locally
//! with [`FieldOperation::apply`].
//!
//! # Merge table
//!
//! Rows are the already pending operation, columns the new one:
//!
//! | previous \ new | Set(v) | Add(xs) | AddUnique(xs) | Delete |
//! |---|---|---|---|---|
//! | none | Set(v) | Add(xs) | AddUnique(xs) | Delete |
//! | Set(u) | Set(v) | Set(u ++ xs) | Set(union(u, xs)) | Delete |
//! | Add(ys) | Set(v) | Add(ys ++ xs) | Set(union(ys, xs)) | Delete |
//! | AddUnique(ys) | Set(v) | Add(ys ++ xs) | Set(union(ys, xs)) | Delete |
//! | Delete | Set(v) | Set(xs) | Set(xs) | Delete |
//!
//! `Increment` and `Remove` merge with `Set`, `Delete` and themselves; every
//! other pairing fails with [`CoreError::InvalidOperationSequence`].

use crate::error::{CoreError, CoreResult};
use crate::value::{add_numbers, difference, existing_list, existing_number, union};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;

/// Pending operations of one object, keyed by field name.
pub type OperationSet = BTreeMap<String, FieldOperation>;

/// One pending mutation to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperation {
    /// Replace the value.
    Set(Value),
    /// Append items to a list, keeping duplicates.
    Add(Vec<Value>),
    /// Append items to a list unless an identical item is present.
    AddUnique(Vec<Value>),
    /// Remove the field.
    Delete,
    /// Add a number to a numeric field.
    Increment(Number),
    /// Remove every identical item from a list.
    Remove(Vec<Value>),
}

/// Result of applying an operation to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The field's new value.
    Value(Value),
    /// The field must be removed from the object.
    Deleted,
}

impl FieldOperation {
    /// Returns the operation's name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldOperation::Set(_) => "Set",
            FieldOperation::Add(_) => "Add",
            FieldOperation::AddUnique(_) => "AddUnique",
            FieldOperation::Delete => "Delete",
            FieldOperation::Increment(_) => "Increment",
            FieldOperation::Remove(_) => "Remove",
        }
    }

    /// Merges this (newer) operation on top of the `previous` pending one.
    ///
    /// Type mismatches found while folding into a pending `Set` are reported
    /// without a field name; callers that know the field attach it with
    /// [`CoreError::with_key`].
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperationSequence`] for pairings without a rule
    /// - [`CoreError::TypeMismatch`] when a list or numeric operation meets a
    ///   pending `Set` of the wrong type
    pub fn merge_with_previous(self, previous: Option<&FieldOperation>) -> CoreResult<Self> {
        use FieldOperation::{Add, AddUnique, Delete, Increment, Remove, Set};

        match (self, previous) {
            (Set(v), _) => Ok(Set(v)),
            (Delete, _) => Ok(Delete),
            (next, None) => Ok(next),

            (Add(xs), Some(Set(u))) => {
                let mut list = existing_list(Some(u), "")?;
                list.extend(xs);
                Ok(Set(Value::Array(list)))
            }
            (Add(xs), Some(Add(ys) | AddUnique(ys))) => {
                let mut list = ys.clone();
                list.extend(xs);
                Ok(Add(list))
            }
            (Add(xs), Some(Delete)) => Ok(Set(Value::Array(xs))),

            (AddUnique(xs), Some(Set(u))) => {
                Ok(Set(Value::Array(union(existing_list(Some(u), "")?, &xs))))
            }
            (AddUnique(xs), Some(Add(ys) | AddUnique(ys))) => {
                Ok(Set(Value::Array(union(ys.clone(), &xs))))
            }
            (AddUnique(xs), Some(Delete)) => Ok(Set(Value::Array(xs))),

            (Increment(n), Some(Set(u))) => {
                let base = existing_number(Some(u), "")?;
                Ok(Set(Value::Number(add_numbers(&base, &n, "")?)))
            }
            (Increment(n), Some(Increment(m))) => Ok(Increment(add_numbers(m, &n, "")?)),
            (Increment(n), Some(Delete)) => Ok(Set(Value::Number(n))),

            (Remove(xs), Some(Set(u))) => {
                Ok(Set(Value::Array(difference(existing_list(Some(u), "")?, &xs))))
            }
            (Remove(xs), Some(Remove(ys))) => Ok(Remove(union(ys.clone(), &xs))),
            (Remove(_), Some(Delete)) => Ok(Delete),

            (next, Some(prev)) => Err(CoreError::InvalidOperationSequence {
                previous: prev.kind(),
                next: next.kind(),
            }),
        }
    }

    /// Applies the operation to a field's current value.
    ///
    /// `old` is `None` when the field is absent; JSON `null` is treated the
    /// same way.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] when the current value has the
    /// wrong type for the operation, or [`CoreError::NumericOverflow`].
    pub fn apply(&self, old: Option<&Value>, key: &str) -> CoreResult<Applied> {
        let value = match self {
            FieldOperation::Set(v) => v.clone(),
            FieldOperation::Add(xs) => {
                let mut list = existing_list(old, key)?;
                list.extend(xs.iter().cloned());
                Value::Array(list)
            }
            FieldOperation::AddUnique(xs) => Value::Array(union(existing_list(old, key)?, xs)),
            FieldOperation::Delete => return Ok(Applied::Deleted),
            FieldOperation::Increment(n) => {
                Value::Number(add_numbers(&existing_number(old, key)?, n, key)?)
            }
            FieldOperation::Remove(xs) => Value::Array(difference(existing_list(old, key)?, xs)),
        };
        Ok(Applied::Value(value))
    }

    /// Folds a sequence of operations, oldest first, into one.
    ///
    /// Returns `None` for an empty sequence.
    pub fn fold<I>(operations: I) -> CoreResult<Option<Self>>
    where
        I: IntoIterator<Item = FieldOperation>,
    {
        let mut merged: Option<FieldOperation> = None;
        for op in operations {
            merged = Some(op.merge_with_previous(merged.as_ref())?);
        }
        Ok(merged)
    }

    /// Encodes to the wire format.
    ///
    /// `Set(v)` is the bare value; every other operation is an object tagged
    /// with `__op`.
    pub fn encode(&self) -> Value {
        match self {
            FieldOperation::Set(v) => v.clone(),
            FieldOperation::Add(xs) => json!({"__op": "Add", "objects": xs}),
            FieldOperation::AddUnique(xs) => json!({"__op": "AddUnique", "objects": xs}),
            FieldOperation::Delete => json!({"__op": "Delete"}),
            FieldOperation::Increment(n) => json!({"__op": "Increment", "amount": n}),
            FieldOperation::Remove(xs) => json!({"__op": "Remove", "objects": xs}),
        }
    }

    /// Decodes from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidWireOperation`] for an unknown `__op` or a
    /// tagged object missing its payload.
    pub fn decode(value: Value) -> CoreResult<Self> {
        let mut map = match value {
            Value::Object(map) if map.contains_key("__op") => map,
            other => return Ok(FieldOperation::Set(other)),
        };

        let op = match map.remove("__op") {
            Some(Value::String(op)) => op,
            _ => return Err(CoreError::invalid_wire("__op must be a string")),
        };

        match op.as_str() {
            "Add" => Ok(FieldOperation::Add(take_objects(&mut map, &op)?)),
            "AddUnique" => Ok(FieldOperation::AddUnique(take_objects(&mut map, &op)?)),
            "Remove" => Ok(FieldOperation::Remove(take_objects(&mut map, &op)?)),
            "Delete" => Ok(FieldOperation::Delete),
            "Increment" => match map.remove("amount") {
                Some(Value::Number(n)) => Ok(FieldOperation::Increment(n)),
                _ => Err(CoreError::invalid_wire("Increment requires a numeric amount")),
            },
            other => Err(CoreError::invalid_wire(format!("unknown __op {other:?}"))),
        }
    }
}

fn take_objects(map: &mut Map<String, Value>, op: &str) -> CoreResult<Vec<Value>> {
    match map.remove("objects") {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(CoreError::invalid_wire(format!(
            "{op} requires an objects list"
        ))),
    }
}

impl Serialize for FieldOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FieldOperation::decode(value).map_err(serde::de::Error::custom)
    }
}
