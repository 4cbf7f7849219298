//! An in-process live query server.
//!
//! [`LoopbackLiveServer`] speaks the live query protocol and implements
//! [`LiveTransport`] itself, so a client connects to it directly without a
//! socket. Tests drive the server side with [`LoopbackLiveServer::publish`]
//! and friends.

use bytes::Bytes;
use objsync_client::{ClientError, ClientResult, LiveTransport};
use objsync_protocol::{
    Codec, ConnectRequest, ConnectedEvent, ErrorEvent, EventOp, JsonCodec, ObjectEvent,
    QueryEventMessage, QuerySpec, RequestAck, RequestId, SubscribeRequest,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Error code for frames the server cannot parse.
pub const INVALID_FRAME: i64 = 1;
/// Error code for unsubscribing an unknown subscription.
pub const UNKNOWN_SUBSCRIPTION: i64 = 2;
/// Error code for a connect with the wrong application id.
pub const INVALID_APPLICATION_ID: i64 = 4;
/// Error code for a subscription the server refuses.
pub const OPERATION_FORBIDDEN: i64 = 119;
/// Error code for a rejected session token.
pub const INVALID_SESSION_TOKEN: i64 = 209;

#[derive(Default)]
struct ServerState {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    subscriptions: BTreeMap<RequestId, QuerySpec>,
    accepted_sessions: Option<HashSet<String>>,
    forbidden_classes: HashMap<String, String>,
    acknowledge: bool,
    sessions: u64,
    received: Vec<QueryEventMessage>,
}

/// A live query server living in the test process.
pub struct LoopbackLiveServer {
    application_id: String,
    codec: JsonCodec,
    state: Mutex<ServerState>,
}

impl LoopbackLiveServer {
    /// Creates a server that accepts connects for `application_id` with any
    /// session.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            codec: JsonCodec,
            state: Mutex::new(ServerState {
                acknowledge: true,
                ..ServerState::default()
            }),
        }
    }

    /// Only accepts connects carrying `token` (or another required token).
    pub fn require_session(&self, token: impl Into<String>) {
        self.state
            .lock()
            .accepted_sessions
            .get_or_insert_with(HashSet::new)
            .insert(token.into());
    }

    /// Rejects subscriptions to `class_name` with `message`.
    pub fn forbid_class(&self, class_name: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .forbidden_classes
            .insert(class_name.into(), message.into());
    }

    /// Stops (or resumes) answering subscribe and unsubscribe frames.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.lock().acknowledge = acknowledge;
    }

    /// Sends `op` for `object` to every subscription whose query matches it.
    ///
    /// Returns the request ids the event was delivered to.
    pub fn publish(&self, op: EventOp, class_name: &str, object: Value) -> Vec<RequestId> {
        let targets: Vec<RequestId> = self
            .state
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, query)| matches_query(query, class_name, &object))
            .map(|(id, _)| *id)
            .collect();

        for request_id in &targets {
            self.publish_to(*request_id, op, object.clone());
        }
        debug!(%op, class = class_name, delivered = targets.len(), "published event");
        targets
    }

    /// Sends `op` for `object` to one subscription, matching or not.
    pub fn publish_to(&self, request_id: RequestId, op: EventOp, object: Value) -> bool {
        let event = ObjectEvent {
            request_id,
            object,
            original: None,
        };
        let message = match op {
            EventOp::Create => QueryEventMessage::Create(event),
            EventOp::Update => QueryEventMessage::Update(event),
            EventOp::Enter => QueryEventMessage::Enter(event),
            EventOp::Leave => QueryEventMessage::Leave(event),
            EventOp::Delete => QueryEventMessage::Delete(event),
            other => {
                warn!(op = %other, "not an object event");
                return false;
            }
        };
        self.deliver(&message)
    }

    /// Sends an error frame.
    pub fn send_error(&self, code: i64, message: &str, request_id: Option<RequestId>) -> bool {
        self.deliver(&QueryEventMessage::Error(ErrorEvent {
            code: Some(code),
            message: Some(message.to_string()),
            request_id,
            reconnect: Some(false),
        }))
    }

    /// Sends a raw frame.
    pub fn send_raw(&self, frame: &Value) -> bool {
        self.push(Bytes::from(frame.to_string()))
    }

    /// Drops the session: the client's inbound stream ends and every
    /// subscription is forgotten.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.outbound = None;
        state.subscriptions.clear();
    }

    /// Returns the active subscriptions.
    pub fn subscriptions(&self) -> Vec<(RequestId, QuerySpec)> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|(id, query)| (*id, query.clone()))
            .collect()
    }

    /// Returns every frame received from clients, in order.
    pub fn received(&self) -> Vec<QueryEventMessage> {
        self.state.lock().received.clone()
    }

    /// Returns the connect frames received so far.
    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(|message| match message {
                QueryEventMessage::Connect(connect) => Some(connect.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of sessions opened.
    pub fn session_count(&self) -> u64 {
        self.state.lock().sessions
    }

    fn deliver(&self, message: &QueryEventMessage) -> bool {
        match message.encode(&self.codec) {
            Ok(bytes) => self.push(bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode server frame");
                false
            }
        }
    }

    fn push(&self, frame: Bytes) -> bool {
        match self.state.lock().outbound.as_ref() {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    fn handle(&self, message: QueryEventMessage) -> Option<QueryEventMessage> {
        self.state.lock().received.push(message.clone());
        match message {
            QueryEventMessage::Connect(connect) => Some(self.handle_connect(&connect)),
            QueryEventMessage::Subscribe(subscribe) => self.handle_subscribe(subscribe),
            QueryEventMessage::Unsubscribe(unsubscribe) => {
                let mut state = self.state.lock();
                let known = state.subscriptions.remove(&unsubscribe.request_id).is_some();
                if !state.acknowledge {
                    return None;
                }
                Some(if known {
                    QueryEventMessage::Unsubscribed(RequestAck {
                        request_id: unsubscribe.request_id,
                    })
                } else {
                    error_frame(
                        UNKNOWN_SUBSCRIPTION,
                        "unknown subscription",
                        Some(unsubscribe.request_id),
                    )
                })
            }
            other => {
                debug!(op = %other.op(), "ignoring server-bound frame");
                None
            }
        }
    }

    fn handle_connect(&self, connect: &ConnectRequest) -> QueryEventMessage {
        if connect.application_id != self.application_id {
            return error_frame(INVALID_APPLICATION_ID, "invalid application id", None);
        }

        let mut state = self.state.lock();
        if let Some(accepted) = &state.accepted_sessions {
            let valid = connect
                .session_token
                .as_ref()
                .is_some_and(|token| accepted.contains(token));
            if !valid {
                return error_frame(INVALID_SESSION_TOKEN, "invalid session token", None);
            }
        }

        state.sessions += 1;
        QueryEventMessage::Connected(ConnectedEvent {
            client_id: Some(format!("client-{}", state.sessions)),
        })
    }

    fn handle_subscribe(&self, subscribe: SubscribeRequest) -> Option<QueryEventMessage> {
        let mut state = self.state.lock();
        let request_id = subscribe.request_id;

        if let Some(message) = state.forbidden_classes.get(subscribe.query.class_name()) {
            return Some(error_frame(OPERATION_FORBIDDEN, message, Some(request_id)));
        }
        if subscribe.application_id != self.application_id {
            return Some(error_frame(
                INVALID_APPLICATION_ID,
                "invalid application id",
                Some(request_id),
            ));
        }

        state.subscriptions.insert(request_id, subscribe.query);
        state
            .acknowledge
            .then_some(QueryEventMessage::Subscribed(RequestAck { request_id }))
    }
}

impl std::fmt::Debug for LoopbackLiveServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackLiveServer")
            .field("application_id", &self.application_id)
            .field("connected", &state.outbound.is_some())
            .field("subscriptions", &state.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl LiveTransport for LoopbackLiveServer {
    fn open(&self, url: &str) -> ClientResult<mpsc::UnboundedReceiver<Bytes>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.outbound = Some(sender);
        state.subscriptions.clear();
        debug!(%url, "loopback live query session opened");
        Ok(receiver)
    }

    fn send(&self, frame: Bytes) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let reply = match self
            .codec
            .deserialize(&frame)
            .and_then(QueryEventMessage::from_value)
        {
            Ok(message) => self.handle(message),
            Err(e) => Some(error_frame(INVALID_FRAME, &e.to_string(), None)),
        };
        if let Some(reply) = reply {
            self.deliver(&reply);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    fn close(&self) -> ClientResult<()> {
        self.disconnect();
        Ok(())
    }
}

fn error_frame(code: i64, message: &str, request_id: Option<RequestId>) -> QueryEventMessage {
    QueryEventMessage::Error(ErrorEvent {
        code: Some(code),
        message: Some(message.to_string()),
        request_id,
        reconnect: Some(false),
    })
}

/// Checks whether `object` of `class_name` satisfies `query`.
///
/// Supports equality and the `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
/// `$nin` and `$exists` operators. Unknown operators never match.
pub fn matches_query(query: &QuerySpec, class_name: &str, object: &Value) -> bool {
    if query.class_name() != class_name {
        return false;
    }
    query
        .where_clause()
        .iter()
        .all(|(key, constraint)| matches_constraint(object.get(key), constraint))
}

fn matches_constraint(field: Option<&Value>, constraint: &Value) -> bool {
    match operator_map(constraint) {
        Some(operators) => operators
            .iter()
            .all(|(operator, operand)| matches_operator(field, operator, operand)),
        None => field == Some(constraint),
    }
}

fn operator_map(constraint: &Value) -> Option<&Map<String, Value>> {
    match constraint {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn matches_operator(field: Option<&Value>, operator: &str, operand: &Value) -> bool {
    match operator {
        "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
        "$ne" => field != Some(operand),
        "$in" => operand
            .as_array()
            .is_some_and(|values| field.is_some_and(|f| values.contains(f))),
        "$nin" => operand
            .as_array()
            .is_some_and(|values| field.map_or(true, |f| !values.contains(f))),
        "$gt" => compare(field, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(field, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(field, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(field, operand), Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}

fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
