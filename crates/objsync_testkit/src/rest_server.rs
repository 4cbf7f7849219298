//! An in-process REST server.
//!
//! [`LoopbackRestServer`] stores objects per class, applies wire-encoded
//! operation sets the way a real server does and runs registered cloud
//! functions. Wrap it in [`objsync_client::LoopbackClient`] to hand it to a
//! client.

use objsync_client::{
    HttpMethod, HttpRequest, HttpResponse, LoopbackServer, APPLICATION_ID_HEADER,
};
use objsync_core::{FieldOperation, ObjectState, OperationSet};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Error code for an unknown object or route.
pub const OBJECT_NOT_FOUND: i64 = 101;
/// Error code for a body that is not a JSON object.
pub const INVALID_JSON: i64 = 107;
/// Error code for an operation that does not fit the stored value.
pub const INCORRECT_TYPE: i64 = 111;
/// Error code for an unknown or failing cloud function.
pub const SCRIPT_FAILED: i64 = 141;

/// A cloud function: takes the call parameters, returns the result or an
/// error code and message.
pub type CloudFunction = Box<dyn Fn(&Value) -> Result<Value, (i64, String)> + Send + Sync>;

/// A REST server living in the test process.
pub struct LoopbackRestServer {
    application_id: String,
    classes: Mutex<BTreeMap<String, BTreeMap<String, ObjectState>>>,
    functions: RwLock<HashMap<String, CloudFunction>>,
    requests: Mutex<Vec<HttpRequest>>,
    failures: Mutex<Vec<(u16, i64, String)>>,
    sequence: AtomicU64,
}

impl LoopbackRestServer {
    /// Creates a server for `application_id`.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            classes: Mutex::new(BTreeMap::new()),
            functions: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Registers a cloud function.
    pub fn define_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&Value) -> Result<Value, (i64, String)> + Send + Sync + 'static,
    {
        self.functions.write().insert(name.into(), Box::new(function));
    }

    /// Makes the next request fail with `status` and an error body.
    pub fn fail_next(&self, status: u16, code: i64, message: impl Into<String>) {
        self.failures.lock().push((status, code, message.into()));
    }

    /// Returns a stored object.
    pub fn object(&self, class_name: &str, object_id: &str) -> Option<ObjectState> {
        self.classes
            .lock()
            .get(class_name)
            .and_then(|objects| objects.get(object_id))
            .cloned()
    }

    /// Returns every stored object of a class.
    pub fn objects(&self, class_name: &str) -> Vec<ObjectState> {
        self.classes
            .lock()
            .get(class_name)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every request received, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn timestamp(&self, sequence: u64) -> String {
        format!(
            "2026-01-01T{:02}:{:02}:{:02}.000Z",
            (sequence / 3600) % 24,
            (sequence / 60) % 60,
            sequence % 60
        )
    }

    fn create(&self, class_name: &str, operations: &OperationSet) -> HttpResponse {
        let outcome = ObjectState::new(class_name).apply(operations);
        if let Some(failure) = outcome.failures.first() {
            return error(400, INCORRECT_TYPE, &failure.error.to_string());
        }

        let sequence = self.next_sequence();
        let object_id = format!("obj{sequence:07}");
        let now = self.timestamp(sequence);
        let state = outcome.state.mutated_clone(|working| {
            working.object_id = Some(object_id.clone());
            working.created_at = Some(now.clone());
            working.updated_at = Some(now.clone());
        });
        self.classes
            .lock()
            .entry(class_name.to_string())
            .or_default()
            .insert(object_id.clone(), state);

        debug!(class = class_name, %object_id, "created object");
        HttpResponse::json(201, &json!({"objectId": object_id, "createdAt": now}))
    }

    fn update(&self, class_name: &str, object_id: &str, operations: &OperationSet) -> HttpResponse {
        let mut classes = self.classes.lock();
        let Some(stored) = classes
            .get_mut(class_name)
            .and_then(|objects| objects.get_mut(object_id))
        else {
            return error(404, OBJECT_NOT_FOUND, "object not found");
        };

        let outcome = stored.apply(operations);
        if let Some(failure) = outcome.failures.first() {
            return error(400, INCORRECT_TYPE, &failure.error.to_string());
        }

        let now = self.timestamp(self.next_sequence());
        *stored = outcome.state.mutated_clone(|working| {
            working.updated_at = Some(now.clone());
        });

        // Fields the client cannot compute alone are echoed back.
        let mut body = Map::new();
        body.insert("updatedAt".into(), Value::String(now));
        for (key, operation) in operations {
            if matches!(operation, FieldOperation::Set(_) | FieldOperation::Delete) {
                continue;
            }
            if let Some(value) = stored.get(key) {
                body.insert(key.clone(), value.clone());
            }
        }
        HttpResponse::json(200, &Value::Object(body))
    }

    fn fetch(&self, class_name: &str, object_id: &str) -> HttpResponse {
        match self.object(class_name, object_id) {
            Some(state) => HttpResponse::json(200, &state.to_json()),
            None => error(404, OBJECT_NOT_FOUND, "object not found"),
        }
    }

    fn destroy(&self, class_name: &str, object_id: &str) -> HttpResponse {
        let removed = self
            .classes
            .lock()
            .get_mut(class_name)
            .and_then(|objects| objects.remove(object_id));
        match removed {
            Some(_) => HttpResponse::json(200, &json!({})),
            None => error(404, OBJECT_NOT_FOUND, "object not found"),
        }
    }

    fn call(&self, name: &str, params: &Value) -> HttpResponse {
        let functions = self.functions.read();
        let Some(function) = functions.get(name) else {
            return error(400, SCRIPT_FAILED, &format!("invalid function: {name}"));
        };
        match function(params) {
            Ok(result) => HttpResponse::json(200, &json!({ "result": result })),
            Err((code, message)) => error(400, code, &message),
        }
    }
}

impl LoopbackServer for LoopbackRestServer {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.requests.lock().push(request.clone());

        if request.header(APPLICATION_ID_HEADER) != Some(self.application_id.as_str()) {
            return HttpResponse::json(403, &json!({"error": "unauthorized"}));
        }
        let injected = {
            let mut failures = self.failures.lock();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some((status, code, message)) = injected {
            return error(status, code, &message);
        }

        let body = match request.body.as_deref() {
            None => Value::Null,
            Some(bytes) => match serde_json::from_slice(bytes) {
                Ok(value) => value,
                Err(e) => return error(400, INVALID_JSON, &e.to_string()),
            },
        };

        let segments = route(request.path());
        match (request.method, segments.as_slice()) {
            (HttpMethod::Post, ["classes", class_name]) => match operations(body) {
                Ok(operations) => self.create(class_name, &operations),
                Err(response) => response,
            },
            (HttpMethod::Put, ["classes", class_name, object_id]) => match operations(body) {
                Ok(operations) => self.update(class_name, object_id, &operations),
                Err(response) => response,
            },
            (HttpMethod::Get, ["classes", class_name, object_id]) => {
                self.fetch(class_name, object_id)
            }
            (HttpMethod::Delete, ["classes", class_name, object_id]) => {
                self.destroy(class_name, object_id)
            }
            (HttpMethod::Post, ["functions", name]) => self.call(name, &body),
            _ => error(404, OBJECT_NOT_FOUND, "no such route"),
        }
    }
}

impl std::fmt::Debug for LoopbackRestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackRestServer")
            .field("application_id", &self.application_id)
            .field("classes", &self.classes.lock().len())
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

/// Strips the mount path, leaving the segments from `classes` or
/// `functions` on.
fn route(path: &str) -> Vec<&str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments
        .iter()
        .position(|s| *s == "classes" || *s == "functions")
    {
        Some(start) => segments[start..].to_vec(),
        None => Vec::new(),
    }
}

fn operations(body: Value) -> Result<OperationSet, HttpResponse> {
    let Value::Object(fields) = body else {
        return Err(error(400, INVALID_JSON, "body must be an object"));
    };
    fields
        .into_iter()
        .map(|(key, value)| {
            FieldOperation::decode(value)
                .map(|operation| (key, operation))
                .map_err(|e| error(400, INCORRECT_TYPE, &e.to_string()))
        })
        .collect()
}

fn error(status: u16, code: i64, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({"code": code, "error": message}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: HttpMethod, path: &str, body: Option<Value>) -> HttpRequest {
        HttpRequest {
            method,
            url: format!("http://localhost:1337/parse/{path}"),
            headers: vec![(APPLICATION_ID_HEADER.to_string(), "app".to_string())],
            body: body.map(|b| b.to_string().into_bytes()),
        }
    }

    fn body(response: &HttpResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn create_then_update_applies_operations() {
        let server = LoopbackRestServer::new("app");
        let created = server.handle(&request(
            HttpMethod::Post,
            "classes/Item",
            Some(json!({"name": "a", "count": {"__op": "Increment", "amount": 2}})),
        ));
        assert_eq!(created.status, 201);
        let id = body(&created)["objectId"].as_str().unwrap().to_string();

        let updated = server.handle(&request(
            HttpMethod::Put,
            &format!("classes/Item/{id}"),
            Some(json!({"count": {"__op": "Increment", "amount": 3}, "name": "b"})),
        ));
        assert_eq!(updated.status, 200);
        assert_eq!(body(&updated)["count"], 5);
        assert!(body(&updated).get("name").is_none());

        let stored = server.object("Item", &id).unwrap();
        assert_eq!(stored.get("name"), Some(&json!("b")));
        assert_eq!(stored.get("count"), Some(&json!(5)));
    }

    #[test]
    fn type_conflicts_are_rejected() {
        let server = LoopbackRestServer::new("app");
        let created = server.handle(&request(
            HttpMethod::Post,
            "classes/Item",
            Some(json!({"name": "a"})),
        ));
        let id = body(&created)["objectId"].as_str().unwrap().to_string();

        let response = server.handle(&request(
            HttpMethod::Put,
            &format!("classes/Item/{id}"),
            Some(json!({"name": {"__op": "Increment", "amount": 1}})),
        ));
        assert_eq!(response.status, 400);
        assert_eq!(body(&response)["code"], INCORRECT_TYPE);
    }

    #[test]
    fn requires_application_id() {
        let server = LoopbackRestServer::new("other");
        let response = server.handle(&request(HttpMethod::Get, "classes/Item/x", None));
        assert_eq!(response.status, 403);
    }

    #[test]
    fn functions_and_injected_failures() {
        let server = LoopbackRestServer::new("app");
        server.define_function("double", |params| {
            let n = params["n"].as_i64().ok_or((SCRIPT_FAILED, "n required".to_string()))?;
            Ok(json!(n * 2))
        });

        let response = server.handle(&request(
            HttpMethod::Post,
            "functions/double",
            Some(json!({"n": 21})),
        ));
        assert_eq!(body(&response), json!({"result": 42}));

        server.fail_next(503, 100, "unavailable");
        let response = server.handle(&request(
            HttpMethod::Post,
            "functions/double",
            Some(json!({"n": 1})),
        ));
        assert_eq!(response.status, 503);

        let response = server.handle(&request(HttpMethod::Post, "functions/missing", None));
        assert_eq!(body(&response)["code"], SCRIPT_FAILED);
        assert_eq!(server.requests().len(), 3);
    }

    #[test]
    fn routes_ignore_mount_path() {
        assert_eq!(route("/parse/classes/Item/abc"), vec!["classes", "Item", "abc"]);
        assert_eq!(route("/functions/hello"), vec!["functions", "hello"]);
        assert!(route("/health").is_empty());
    }
}
