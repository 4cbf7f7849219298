//! Immutable snapshots of an object's server data.

use crate::error::{CoreError, CoreResult};
use crate::operation::{Applied, OperationSet};
use crate::value::kind_name;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const OBJECT_ID: &str = "objectId";
const CLASS_NAME: &str = "className";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";

/// Last-known server state of one remote object.
///
/// States are never mutated in place once published. New states are
/// derived with [`ObjectState::apply`] or [`ObjectState::mutated_clone`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectState {
    class_name: String,
    object_id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    server_data: BTreeMap<String, Value>,
}

/// Mutable working copy handed to [`ObjectState::mutated_clone`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutableState {
    /// Class (type) name of the object.
    pub class_name: String,
    /// Server-assigned id, once the object has been saved.
    pub object_id: Option<String>,
    /// Creation timestamp as returned by the server.
    pub created_at: Option<String>,
    /// Last update timestamp as returned by the server.
    pub updated_at: Option<String>,
    /// Field values.
    pub server_data: BTreeMap<String, Value>,
}

/// A field that could not be applied.
#[derive(Debug)]
pub struct FieldFailure {
    /// Field name.
    pub key: String,
    /// Why the operation failed.
    pub error: CoreError,
}

/// Result of applying an operation set: the new state plus per-field failures.
///
/// Fields that failed keep their previous value in `state`.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// The derived state.
    pub state: ObjectState,
    /// Fields whose operation could not be applied.
    pub failures: Vec<FieldFailure>,
}

impl ApplyOutcome {
    /// Returns true if every field applied.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the state, or the first failure if any field failed.
    pub fn into_result(self) -> CoreResult<ObjectState> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.state),
        }
    }
}

impl ObjectState {
    /// Creates an empty state for a class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    /// Builds a state from a server JSON object.
    ///
    /// `objectId`, `className`, `createdAt` and `updatedAt` are lifted out of
    /// the field map. A `className` in the document wins over `class_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if `value` is not an object.
    pub fn from_json(class_name: impl Into<String>, value: Value) -> CoreResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::TypeMismatch {
                    key: "<object>".into(),
                    expected: "object",
                    found: kind_name(&other),
                })
            }
        };

        let mut state = ObjectState::new(class_name);
        for (key, value) in map {
            match (key.as_str(), value.as_str()) {
                (OBJECT_ID, Some(id)) => state.object_id = Some(id.to_owned()),
                (CLASS_NAME, Some(class)) => state.class_name = class.to_owned(),
                (CREATED_AT, Some(at)) => state.created_at = Some(at.to_owned()),
                (UPDATED_AT, Some(at)) => state.updated_at = Some(at.to_owned()),
                _ => {
                    state.server_data.insert(key, value);
                }
            }
        }
        Ok(state)
    }

    /// Renders the state as a server-style JSON object.
    pub fn to_json(&self) -> Value {
        let mut map: Map<String, Value> = self
            .server_data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert(CLASS_NAME.into(), Value::String(self.class_name.clone()));
        if let Some(id) = &self.object_id {
            map.insert(OBJECT_ID.into(), Value::String(id.clone()));
        }
        if let Some(at) = &self.created_at {
            map.insert(CREATED_AT.into(), Value::String(at.clone()));
        }
        if let Some(at) = &self.updated_at {
            map.insert(UPDATED_AT.into(), Value::String(at.clone()));
        }
        Value::Object(map)
    }

    /// Returns the class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the server id, if the object has been saved.
    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// Returns the last update timestamp.
    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Returns a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.server_data.get(key)
    }

    /// Returns true if the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.server_data.contains_key(key)
    }

    /// Returns all field values.
    pub fn server_data(&self) -> &BTreeMap<String, Value> {
        &self.server_data
    }

    /// Derives a new state by running `mutator` on a copy of this one.
    pub fn mutated_clone<F>(&self, mutator: F) -> ObjectState
    where
        F: FnOnce(&mut MutableState),
    {
        let mut working = MutableState {
            class_name: self.class_name.clone(),
            object_id: self.object_id.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            server_data: self.server_data.clone(),
        };
        mutator(&mut working);
        ObjectState {
            class_name: working.class_name,
            object_id: working.object_id,
            created_at: working.created_at,
            updated_at: working.updated_at,
            server_data: working.server_data,
        }
    }

    /// Applies every operation in the set, each field independently.
    ///
    /// A field whose operation fails keeps its old value and is reported in
    /// [`ApplyOutcome::failures`]; the remaining fields still apply.
    pub fn apply(&self, operations: &OperationSet) -> ApplyOutcome {
        let mut failures = Vec::new();
        let state = self.mutated_clone(|working| {
            for (key, op) in operations {
                match op.apply(working.server_data.get(key), key) {
                    Ok(Applied::Value(value)) => {
                        working.server_data.insert(key.clone(), value);
                    }
                    Ok(Applied::Deleted) => {
                        working.server_data.remove(key);
                    }
                    Err(error) => failures.push(FieldFailure {
                        key: key.clone(),
                        error,
                    }),
                }
            }
        });
        ApplyOutcome { state, failures }
    }

    /// Overlays a state returned by the server on top of this one.
    ///
    /// Identity and timestamps present in `server` win; its fields replace
    /// fields with the same name, other fields are kept.
    pub fn merged_with(&self, server: &ObjectState) -> ObjectState {
        self.mutated_clone(|working| {
            if server.object_id.is_some() {
                working.object_id = server.object_id.clone();
            }
            if server.created_at.is_some() {
                working.created_at = server.created_at.clone();
            }
            if server.updated_at.is_some() {
                working.updated_at = server.updated_at.clone();
            }
            for (key, value) in &server.server_data {
                working.server_data.insert(key.clone(), value.clone());
            }
        })
    }
}
