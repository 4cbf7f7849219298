//! Flushing objects and calling cloud functions against the loopback REST
//! server.

use objsync_client::{
    ClientError, CloudInvoker, LoopbackClient, APPLICATION_ID_HEADER, INSTALLATION_ID_HEADER,
    SESSION_TOKEN_HEADER,
};
use objsync_core::RemoteObject;
use objsync_testkit::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

type RestServer = Arc<LoopbackClient<LoopbackRestServer>>;

fn server() -> RestServer {
    init_tracing();
    let server = LoopbackRestServer::new(TEST_APPLICATION_ID);
    server.define_function("greet", |params| {
        let name = params["name"]
            .as_str()
            .ok_or((SCRIPT_FAILED, "name is required".to_string()))?;
        Ok(json!(format!("hello {name}")))
    });
    Arc::new(LoopbackClient::new(server))
}

#[test]
fn flush_creates_then_updates() {
    let rest = server();
    let context = test_context_with_http(rest.clone());

    let mut object = RemoteObject::new("Item");
    object.set("name", "widget").unwrap();
    object.increment("count", 2).unwrap();
    object.add_unique("tags", ["a", "b"]).unwrap();

    let saved = context.flush(&mut object).unwrap();
    let object_id = saved.object_id().unwrap().to_string();
    assert!(saved.created_at().is_some());
    assert!(!object.is_dirty());
    assert_eq!(object.get("count"), Some(&json!(2)));

    object.increment("count", 3).unwrap();
    object.remove_all("tags", ["a"]).unwrap();
    context.flush(&mut object).unwrap();
    assert_eq!(object.object_id(), Some(object_id.as_str()));
    assert_eq!(object.get("count"), Some(&json!(5)));
    assert_eq!(object.get("tags"), Some(&json!(["b"])));

    let stored = rest.server().object("Item", &object_id).unwrap();
    assert_eq!(stored.get("name"), Some(&json!("widget")));
    assert_eq!(stored.get("count"), Some(&json!(5)));
    assert_eq!(stored.get("tags"), Some(&json!(["b"])));
    assert_eq!(stored.updated_at(), object.state().updated_at());
}

#[test]
fn failed_flush_keeps_edits() {
    let rest = server();
    let context = test_context_with_http(rest.clone());

    let mut object = RemoteObject::new("Item");
    object.increment("count", 1).unwrap();
    rest.server().fail_next(503, 503, "unavailable");

    let err = context.flush(&mut object).unwrap_err();
    assert!(matches!(err, ClientError::Server { code: 503, .. }));
    assert!(err.is_retryable());
    assert!(object.is_dirty());
    assert_eq!(object.in_flight_saves(), 0);

    object.increment("count", 1).unwrap();
    context.flush(&mut object).unwrap();
    assert_eq!(object.get("count"), Some(&json!(2)));
    assert_eq!(rest.server().objects("Item").len(), 1);
}

#[test]
fn server_rejects_conflicting_operation() {
    let rest = server();
    let context = test_context_with_http(rest.clone());

    let mut object = RemoteObject::new("Item");
    object.set("name", "widget").unwrap();
    context.flush(&mut object).unwrap();

    // A stale copy that never saw the string value.
    let state = object.state().mutated_clone(|working| {
        working.server_data.remove("name");
    });
    let mut stale = RemoteObject::from_state(state);
    stale.increment("name", 1).unwrap();

    let err = context.flush(&mut stale).unwrap_err();
    assert!(matches!(err, ClientError::Server { code: INCORRECT_TYPE, .. }));
    assert!(stale.is_key_dirty("name"));
}

#[test]
fn requests_carry_application_headers() {
    let rest = server();
    let context = objsync_client::ClientContext::builder(test_config())
        .with_http_client(rest.clone())
        .with_session_token("r:session")
        .build()
        .unwrap();
    let installation = objsync_testkit::block_on(context.installation().get()).unwrap();

    let mut object = RemoteObject::new("Item");
    object.set("name", "widget").unwrap();
    context.flush(&mut object).unwrap();

    let request = rest.server().requests().pop().unwrap();
    assert_eq!(request.header(APPLICATION_ID_HEADER), Some(TEST_APPLICATION_ID));
    assert_eq!(request.header(SESSION_TOKEN_HEADER), Some("r:session"));
    assert_eq!(
        request.header(INSTALLATION_ID_HEADER),
        Some(installation.to_string().as_str())
    );
    assert_eq!(request.path(), "/parse/classes/Item");
}

#[test]
fn cloud_function_returns_result() {
    let rest = server();
    let context = test_context_with_http(rest.clone());
    let cloud = CloudInvoker::new(context.rest().unwrap(), Some("r:caller".into()));

    let greeting: String = cloud.call("greet", &json!({"name": "ada"})).unwrap();
    assert_eq!(greeting, "hello ada");

    let request = rest.server().requests().pop().unwrap();
    assert_eq!(request.path(), "/parse/functions/greet");
    assert_eq!(request.header(SESSION_TOKEN_HEADER), Some("r:caller"));
}

#[test]
fn cloud_function_errors_surface_server_codes() {
    let rest = server();
    let context = test_context_with_http(rest);
    let cloud = CloudInvoker::new(context.rest().unwrap(), None);

    let err = cloud.call::<_, Value>("greet", &json!({})).unwrap_err();
    assert!(matches!(err, ClientError::Server { code: SCRIPT_FAILED, .. }));

    let err = cloud.call::<_, Value>("missing", &json!({})).unwrap_err();
    assert!(matches!(err, ClientError::Server { code: SCRIPT_FAILED, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn cloud_uses_connection_session() {
    let rest = server();
    let live = Arc::new(LoopbackLiveServer::new(TEST_APPLICATION_ID));
    let context = objsync_client::ClientContext::builder(test_config())
        .with_http_client(rest.clone())
        .with_session_token("r:live")
        .build()
        .unwrap();
    let connection = context.connect(live).await.unwrap();

    let cloud = context.cloud(&connection).unwrap();
    assert_eq!(cloud.session_token(), Some("r:live"));
    let greeting: String = cloud.call("greet", &json!({"name": "bob"})).unwrap();
    assert_eq!(greeting, "hello bob");
}
