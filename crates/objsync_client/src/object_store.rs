//! Saving remote objects.

use crate::error::{ClientError, ClientResult};
use crate::http::{HttpMethod, RestEndpoint};
use objsync_core::{ObjectState, OperationSet, RemoteObject};
use objsync_protocol::ProtocolError;
use tracing::{debug, info, warn};

/// Persists operation sets on the server.
pub trait RemoteStore: Send + Sync {
    /// Creates (no `object_id`) or updates an object and returns the fields
    /// the server assigned (`objectId`, timestamps, computed fields).
    fn save(
        &self,
        class_name: &str,
        object_id: Option<&str>,
        operations: &OperationSet,
        session_token: Option<&str>,
    ) -> ClientResult<ObjectState>;
}

/// [`RemoteStore`] over the REST `classes` endpoints.
///
/// Creates are `POST classes/{class}`, updates `PUT classes/{class}/{id}`;
/// the body is the operation set in wire encoding.
#[derive(Debug, Clone)]
pub struct RestObjectStore {
    rest: RestEndpoint,
}

impl RestObjectStore {
    /// Creates a store.
    pub fn new(rest: RestEndpoint) -> Self {
        Self { rest }
    }
}

impl RemoteStore for RestObjectStore {
    fn save(
        &self,
        class_name: &str,
        object_id: Option<&str>,
        operations: &OperationSet,
        session_token: Option<&str>,
    ) -> ClientResult<ObjectState> {
        let body = serde_json::to_value(operations).map_err(ProtocolError::from)?;
        let (method, path) = match object_id {
            Some(id) => (HttpMethod::Put, format!("classes/{class_name}/{id}")),
            None => (HttpMethod::Post, format!("classes/{class_name}")),
        };

        let response = self.rest.request(method, &path, Some(&body), session_token)?;
        let response = if response.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            response
        };
        Ok(ObjectState::from_json(class_name, response)?)
    }
}

/// Saves the object's pending operations and commits the server's answer.
///
/// On failure the operations are merged back into the object so no edit is
/// lost, and the store's error is returned.
///
/// # Errors
///
/// Returns [`ClientError::InvalidConfig`] for an object without a class
/// name, or whatever the store returns.
pub fn flush(
    object: &mut RemoteObject,
    store: &dyn RemoteStore,
    session_token: Option<&str>,
) -> ClientResult<ObjectState> {
    if object.class_name().is_empty() {
        return Err(ClientError::InvalidConfig("object has no class name".into()));
    }
    if !object.is_dirty() {
        debug!(class = %object.class_name(), "nothing to flush");
        return Ok(object.state().clone());
    }

    let class_name = object.class_name().to_string();
    let object_id = object.object_id().map(str::to_owned);
    let save = object.start_save();

    match store.save(&class_name, object_id.as_deref(), save.operations(), session_token) {
        Ok(server) => {
            let committed = object.handle_save_result(&save, Some(&server)).clone();
            info!(class = %class_name, object_id = ?committed.object_id(), "flushed object");
            Ok(committed)
        }
        Err(e) => {
            warn!(class = %class_name, error = %e, "flush failed, keeping operations");
            if let Err(merge) = object.handle_failed_save(save) {
                warn!(error = %merge, "could not merge failed operations back");
            }
            Err(e)
        }
    }
}
