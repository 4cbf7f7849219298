//! Live query definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The query a live subscription watches.
///
/// Serializes as `{"className": .., "where": {..}, "keys"?: [..]}`.
/// Equality constraints are stored as the bare value; comparison
/// constraints on the same field are collected into one `$`-operator object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    class_name: String,
    #[serde(rename = "where", default)]
    where_clause: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keys: Option<Vec<String>>,
}

impl QuerySpec {
    /// Creates a query matching every object of a class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            where_clause: Map::new(),
            keys: None,
        }
    }

    /// Returns the class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the constraint map.
    pub fn where_clause(&self) -> &Map<String, Value> {
        &self.where_clause
    }

    /// Returns the selected keys, if restricted.
    pub fn keys(&self) -> Option<&[String]> {
        self.keys.as_deref()
    }

    /// Field must equal `value`. Replaces earlier constraints on the field.
    pub fn where_equal_to(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_clause.insert(key.into(), value.into());
        self
    }

    /// Field must not equal `value`.
    pub fn where_not_equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(key, "$ne", value.into())
    }

    /// Field must be greater than `value`.
    pub fn where_greater_than(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(key, "$gt", value.into())
    }

    /// Field must be greater than or equal to `value`.
    pub fn where_greater_than_or_equal_to(
        self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.with_operator(key, "$gte", value.into())
    }

    /// Field must be less than `value`.
    pub fn where_less_than(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(key, "$lt", value.into())
    }

    /// Field must be less than or equal to `value`.
    pub fn where_less_than_or_equal_to(
        self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.with_operator(key, "$lte", value.into())
    }

    /// Field must be one of `values`.
    pub fn where_contained_in<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with_operator(key, "$in", Value::Array(values))
    }

    /// Field must not be any of `values`.
    pub fn where_not_contained_in<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with_operator(key, "$nin", Value::Array(values))
    }

    /// Field must be present.
    pub fn where_exists(self, key: impl Into<String>) -> Self {
        self.with_operator(key, "$exists", Value::Bool(true))
    }

    /// Field must be absent.
    pub fn where_does_not_exist(self, key: impl Into<String>) -> Self {
        self.with_operator(key, "$exists", Value::Bool(false))
    }

    /// Restricts the fields sent with each event.
    pub fn select_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    fn with_operator(mut self, key: impl Into<String>, operator: &str, value: Value) -> Self {
        let key = key.into();
        match self.where_clause.get_mut(&key) {
            Some(Value::Object(constraints)) if is_operator_map(constraints) => {
                constraints.insert(operator.to_string(), value);
            }
            _ => {
                let mut constraints = Map::new();
                constraints.insert(operator.to_string(), value);
                self.where_clause.insert(key, Value::Object(constraints));
            }
        }
        self
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}
