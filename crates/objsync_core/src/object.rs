//! Client-side handle for one remote object.

use crate::error::{CoreError, CoreResult};
use crate::operation::{FieldOperation, OperationSet};
use crate::state::ObjectState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A remote object with locally queued edits.
///
/// Mutations are not sent anywhere; they are merged into the current
/// [`OperationSet`] (one pending operation per field) and reflected in the
/// estimated state returned by [`RemoteObject::get`]. A flush takes the
/// current set with [`RemoteObject::start_save`] and reports back with
/// [`RemoteObject::handle_save_result`] or [`RemoteObject::handle_failed_save`].
///
/// The object is owned by one caller at a time and does no internal locking.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    state: ObjectState,
    in_flight: VecDeque<PendingSave>,
    current: OperationSet,
    estimated: ObjectState,
    next_sequence: u64,
}

/// An operation set taken by [`RemoteObject::start_save`].
///
/// The sequence number identifies the save on its object, so identical
/// operation sets in flight at the same time stay distinguishable.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSave {
    sequence: u64,
    operations: OperationSet,
}

impl PendingSave {
    /// Returns the save's sequence number, unique per object.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the operations being saved.
    pub fn operations(&self) -> &OperationSet {
        &self.operations
    }
}

impl RemoteObject {
    /// Creates a new, never saved object of the given class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self::from_state(ObjectState::new(class_name))
    }

    /// Wraps an existing server state.
    pub fn from_state(state: ObjectState) -> Self {
        Self {
            estimated: state.clone(),
            state,
            in_flight: VecDeque::new(),
            current: OperationSet::new(),
            next_sequence: 1,
        }
    }

    /// Returns the class name.
    pub fn class_name(&self) -> &str {
        self.state.class_name()
    }

    /// Returns the server id, if the object has been saved.
    pub fn object_id(&self) -> Option<&str> {
        self.state.object_id()
    }

    /// Returns the last committed server state.
    pub fn state(&self) -> &ObjectState {
        &self.state
    }

    /// Returns the committed state with every queued operation applied.
    pub fn estimated_state(&self) -> &ObjectState {
        &self.estimated
    }

    /// Returns the operations queued since the last `start_save`.
    pub fn current_operations(&self) -> &OperationSet {
        &self.current
    }

    /// Returns the number of saves started but not yet resolved.
    pub fn in_flight_saves(&self) -> usize {
        self.in_flight.len()
    }

    /// Sets a field.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> CoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.perform_operation(key, FieldOperation::Set(value))
    }

    /// Appends items to a list field.
    pub fn add<I, T>(&mut self, key: &str, items: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let items = to_values(items)?;
        self.perform_operation(key, FieldOperation::Add(items))
    }

    /// Appends items to a list field, skipping items already present.
    pub fn add_unique<I, T>(&mut self, key: &str, items: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let items = to_values(items)?;
        self.perform_operation(key, FieldOperation::AddUnique(items))
    }

    /// Removes every identical item from a list field.
    pub fn remove_all<I, T>(&mut self, key: &str, items: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let items = to_values(items)?;
        self.perform_operation(key, FieldOperation::Remove(items))
    }

    /// Deletes a field.
    pub fn delete(&mut self, key: &str) -> CoreResult<()> {
        self.perform_operation(key, FieldOperation::Delete)
    }

    /// Adds an integer amount to a numeric field.
    pub fn increment(&mut self, key: &str, amount: impl Into<Number>) -> CoreResult<()> {
        self.perform_operation(key, FieldOperation::Increment(amount.into()))
    }

    /// Adds a floating point amount to a numeric field.
    pub fn increment_by_float(&mut self, key: &str, amount: f64) -> CoreResult<()> {
        let amount = Number::from_f64(amount).ok_or_else(|| CoreError::NumericOverflow {
            key: key.to_string(),
        })?;
        self.perform_operation(key, FieldOperation::Increment(amount))
    }

    /// Returns the estimated value of a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.estimated.get(key)
    }

    /// Returns the estimated value of a field decoded as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Json`] if the value does not decode as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        match self.estimated.get(key) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// Returns true if the estimated state has the field.
    pub fn contains_key(&self, key: &str) -> bool {
        self.estimated.contains_key(key)
    }

    /// Returns true if the object was never saved or has unsaved edits.
    pub fn is_dirty(&self) -> bool {
        self.state.object_id().is_none() || !self.current.is_empty()
    }

    /// Returns true if the field has an unsaved edit.
    pub fn is_key_dirty(&self, key: &str) -> bool {
        self.current.contains_key(key)
    }

    /// Drops every edit made since the last `start_save`.
    pub fn revert(&mut self) {
        if !self.current.is_empty() {
            debug!(class = %self.class_name(), count = self.current.len(), "reverting pending operations");
        }
        self.current.clear();
        self.rebuild_estimated();
    }

    /// Drops the unsaved edit of one field.
    pub fn revert_key(&mut self, key: &str) {
        if self.current.remove(key).is_some() {
            self.rebuild_estimated();
        }
    }

    /// Takes the current operation set for saving and opens a fresh one.
    ///
    /// Edits made while the save is in flight go into the new set.
    pub fn start_save(&mut self) -> PendingSave {
        let save = PendingSave {
            sequence: self.next_sequence,
            operations: std::mem::take(&mut self.current),
        };
        self.next_sequence += 1;
        self.in_flight.push_back(save.clone());
        debug!(
            class = %self.class_name(),
            sequence = save.sequence,
            fields = save.operations.len(),
            "starting save"
        );
        save
    }

    /// Commits a successful save.
    ///
    /// The saved operations are applied to the committed state, then the
    /// fields returned by the server are overlaid.
    pub fn handle_save_result(
        &mut self,
        save: &PendingSave,
        server: Option<&ObjectState>,
    ) -> &ObjectState {
        match self.in_flight_position(save) {
            Some(index) => {
                self.in_flight.remove(index);
            }
            None => debug!(sequence = save.sequence, "save result for a save that was not in flight"),
        }

        let outcome = self.state.apply(&save.operations);
        for failure in &outcome.failures {
            warn!(key = %failure.key, error = %failure.error, "saved operation did not apply locally");
        }
        self.state = match server {
            Some(server) => outcome.state.merged_with(server),
            None => outcome.state,
        };
        self.rebuild_estimated();
        &self.state
    }

    /// Puts the operations of a failed save back underneath newer edits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperationSequence`] if a newer edit cannot
    /// be merged on top of the failed one. Nothing is dropped in that case:
    /// the failed set stays queued.
    pub fn handle_failed_save(&mut self, save: PendingSave) -> CoreResult<()> {
        let position = self.in_flight_position(&save);
        let has_successor = matches!(position, Some(index) if index + 1 < self.in_flight.len());

        let next = match position {
            Some(index) if has_successor => &self.in_flight[index + 1].operations,
            _ => &self.current,
        };
        let mut merged = next.clone();
        for (key, failed) in &save.operations {
            let op = match merged.remove(key) {
                Some(newer) => newer
                    .merge_with_previous(Some(failed))
                    .map_err(|e| e.with_key(key))?,
                None => failed.clone(),
            };
            merged.insert(key.clone(), op);
        }

        match position {
            Some(index) if has_successor => {
                self.in_flight[index + 1].operations = merged;
                self.in_flight.remove(index);
            }
            Some(index) => {
                self.current = merged;
                self.in_flight.remove(index);
            }
            None => self.current = merged,
        }
        debug!(
            class = %self.class_name(),
            sequence = save.sequence,
            fields = save.operations.len(),
            "restored operations of failed save"
        );
        self.rebuild_estimated();
        Ok(())
    }

    fn perform_operation(&mut self, key: &str, operation: FieldOperation) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::InvalidKey { key: key.into() });
        }

        // Type check only; the estimate is rebuilt from the merged set.
        operation.apply(self.estimated.get(key), key)?;
        let merged = operation
            .merge_with_previous(self.current.get(key))
            .map_err(|e| e.with_key(key))?;

        debug!(class = %self.class_name(), key, op = merged.kind(), "queued operation");
        self.current.insert(key.to_string(), merged);
        self.rebuild_estimated();
        Ok(())
    }

    fn in_flight_position(&self, save: &PendingSave) -> Option<usize> {
        self.in_flight
            .iter()
            .position(|pending| pending.sequence == save.sequence)
    }

    fn rebuild_estimated(&mut self) {
        let mut estimated = self.state.clone();
        let queued = self.in_flight.iter().map(|save| &save.operations);
        for set in queued.chain(std::iter::once(&self.current)) {
            let outcome = estimated.apply(set);
            for failure in &outcome.failures {
                debug!(key = %failure.key, error = %failure.error, "pending operation skipped in estimate");
            }
            estimated = outcome.state;
        }
        self.estimated = estimated;
    }
}

fn to_values<I, T>(items: I) -> CoreResult<Vec<Value>>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    items
        .into_iter()
        .map(|item| serde_json::to_value(item).map_err(CoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn saved(fields: Value) -> RemoteObject {
        let mut doc = fields;
        doc["objectId"] = json!("obj1");
        RemoteObject::from_state(ObjectState::from_json("Item", doc).unwrap())
    }

    #[test]
    fn edits_merge_into_one_pending_operation() {
        let mut obj = saved(json!({"tags": ["a"]}));
        obj.add("tags", ["b"]).unwrap();
        obj.add("tags", ["c"]).unwrap();

        assert_eq!(obj.current_operations().len(), 1);
        assert_eq!(
            obj.current_operations()["tags"],
            FieldOperation::Add(vec![json!("b"), json!("c")])
        );
        assert_eq!(obj.get("tags"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn delete_then_add_becomes_set() {
        let mut obj = saved(json!({"tags": ["a"]}));
        obj.delete("tags").unwrap();
        obj.add("tags", ["z"]).unwrap();

        assert_eq!(
            obj.current_operations()["tags"],
            FieldOperation::Set(json!(["z"]))
        );
        assert_eq!(obj.get("tags"), Some(&json!(["z"])));
    }

    #[test]
    fn rejects_empty_key() {
        let mut obj = RemoteObject::new("Item");
        let err = obj.set("", 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidKey { .. }));
        assert!(obj.current_operations().is_empty());
    }

    #[test]
    fn invalid_sequence_carries_no_partial_state() {
        let mut obj = saved(json!({}));
        obj.add("list", [1]).unwrap();
        let err = obj.increment("list", 1).unwrap_err();

        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert_eq!(obj.current_operations()["list"], FieldOperation::Add(vec![json!(1)]));
    }

    #[test]
    fn increment_twice_then_get() {
        let mut obj = saved(json!({"score": 10}));
        obj.increment("score", 2).unwrap();
        obj.increment("score", 3).unwrap();

        assert_eq!(
            obj.current_operations()["score"],
            FieldOperation::Increment(Number::from(5))
        );
        assert_eq!(obj.get_as::<i64>("score").unwrap(), Some(15));
    }

    #[test]
    fn dirty_tracking() {
        let mut obj = saved(json!({"a": 1}));
        assert!(!obj.is_dirty());

        obj.set("a", 2).unwrap();
        assert!(obj.is_dirty());
        assert!(obj.is_key_dirty("a"));
        assert!(!obj.is_key_dirty("b"));

        obj.revert();
        assert!(!obj.is_dirty());
        assert_eq!(obj.get("a"), Some(&json!(1)));

        assert!(RemoteObject::new("Item").is_dirty());
    }

    #[test]
    fn revert_key_keeps_other_edits() {
        let mut obj = saved(json!({}));
        obj.set("a", 1).unwrap();
        obj.set("b", 2).unwrap();
        obj.revert_key("a");

        assert!(obj.get("a").is_none());
        assert_eq!(obj.get("b"), Some(&json!(2)));
    }

    #[test]
    fn save_lifecycle_commits_and_keeps_later_edits() {
        let mut obj = RemoteObject::new("Item");
        obj.set("name", "first").unwrap();

        let saving = obj.start_save();
        assert!(obj.current_operations().is_empty());
        assert_eq!(obj.in_flight_saves(), 1);

        obj.set("other", true).unwrap();

        let server = ObjectState::from_json(
            "Item",
            json!({"objectId": "new1", "createdAt": "2024-05-01T00:00:00.000Z"}),
        )
        .unwrap();
        let committed = obj.handle_save_result(&saving, Some(&server)).clone();

        assert_eq!(committed.object_id(), Some("new1"));
        assert_eq!(committed.get("name"), Some(&json!("first")));
        assert!(committed.get("other").is_none());
        assert_eq!(obj.in_flight_saves(), 0);
        assert_eq!(obj.get("other"), Some(&json!(true)));
        assert!(obj.is_key_dirty("other"));
    }

    #[test]
    fn failed_save_merges_back_under_newer_edits() {
        let mut obj = saved(json!({"tags": []}));
        obj.add("tags", ["a"]).unwrap();
        obj.set("title", "t").unwrap();

        let saving = obj.start_save();
        obj.add("tags", ["b"]).unwrap();

        obj.handle_failed_save(saving).unwrap();

        assert_eq!(obj.in_flight_saves(), 0);
        assert_eq!(
            obj.current_operations()["tags"],
            FieldOperation::Add(vec![json!("a"), json!("b")])
        );
        assert_eq!(obj.current_operations()["title"], FieldOperation::Set(json!("t")));
        assert_eq!(obj.get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn failed_save_with_conflicting_edit_stays_queued() {
        let mut obj = saved(json!({}));
        obj.add("list", [1]).unwrap();
        let saving = obj.start_save();
        obj.remove_all("list", [1]).unwrap();

        let err = obj.handle_failed_save(saving).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperationSequence { .. }));
        assert_eq!(obj.in_flight_saves(), 1);
        assert_eq!(obj.current_operations()["list"], FieldOperation::Remove(vec![json!(1)]));
    }

    #[test]
    fn estimate_matches_merged_operations() {
        let mut obj = saved(json!({"tags": ["a"]}));
        obj.add_unique("tags", ["a"]).unwrap();
        obj.add("tags", ["c"]).unwrap();
        obj.set("other", 1).unwrap();

        assert_eq!(
            obj.current_operations()["tags"],
            FieldOperation::Add(vec![json!("a"), json!("c")])
        );
        assert_eq!(obj.get("tags"), Some(&json!(["a", "a", "c"])));

        obj.revert_key("other");
        assert_eq!(obj.get("tags"), Some(&json!(["a", "a", "c"])));

        let saving = obj.start_save();
        let committed = obj.handle_save_result(&saving, None).clone();
        assert_eq!(committed.get("tags"), Some(&json!(["a", "a", "c"])));
        assert_eq!(obj.get("tags"), committed.get("tags"));
    }

    #[test]
    fn identical_sets_in_flight_resolve_by_sequence() {
        let mut obj = saved(json!({"count": 0}));
        obj.increment("count", 1).unwrap();
        let first = obj.start_save();
        obj.increment("count", 1).unwrap();
        let second = obj.start_save();

        assert_eq!(first.operations(), second.operations());
        assert_ne!(first.sequence(), second.sequence());
        assert_eq!(obj.in_flight_saves(), 2);

        obj.handle_failed_save(second).unwrap();
        assert_eq!(obj.in_flight_saves(), 1);
        assert_eq!(
            obj.current_operations()["count"],
            FieldOperation::Increment(Number::from(1))
        );

        let committed = obj.handle_save_result(&first, None).clone();
        assert_eq!(committed.get("count"), Some(&json!(1)));
        assert_eq!(obj.in_flight_saves(), 0);
        assert_eq!(obj.get("count"), Some(&json!(2)));
    }
}
