//! Live query frames.
//!
//! Every frame is a JSON object whose `op` field names the message. Frames
//! tied to one subscription carry its `requestId`; `connect`, `connected`
//! and connection-scoped `error` frames do not.

use crate::codec::Codec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::query::QuerySpec;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Subscription identifier, unique per connection.
pub type RequestId = u32;

/// The `op` of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOp {
    /// Client opens the session.
    Connect,
    /// Server accepted the session.
    Connected,
    /// Client registers a query.
    Subscribe,
    /// Server accepted a subscription.
    Subscribed,
    /// An object matching the query was created.
    Create,
    /// A matching object changed and still matches.
    Update,
    /// An object changed and now matches.
    Enter,
    /// An object changed and no longer matches.
    Leave,
    /// A matching object was deleted.
    Delete,
    /// Client drops a subscription.
    Unsubscribe,
    /// Server dropped a subscription.
    Unsubscribed,
    /// Server reported an error.
    Error,
}

impl EventOp {
    /// Every op, in protocol order.
    pub const ALL: [EventOp; 12] = [
        EventOp::Connect,
        EventOp::Connected,
        EventOp::Subscribe,
        EventOp::Subscribed,
        EventOp::Create,
        EventOp::Update,
        EventOp::Enter,
        EventOp::Leave,
        EventOp::Delete,
        EventOp::Unsubscribe,
        EventOp::Unsubscribed,
        EventOp::Error,
    ];

    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventOp::Connect => "connect",
            EventOp::Connected => "connected",
            EventOp::Subscribe => "subscribe",
            EventOp::Subscribed => "subscribed",
            EventOp::Create => "create",
            EventOp::Update => "update",
            EventOp::Enter => "enter",
            EventOp::Leave => "leave",
            EventOp::Delete => "delete",
            EventOp::Unsubscribe => "unsubscribe",
            EventOp::Unsubscribed => "unsubscribed",
            EventOp::Error => "error",
        }
    }

    /// Parses a wire name.
    pub fn parse(op: &str) -> Option<Self> {
        EventOp::ALL.into_iter().find(|candidate| candidate.as_str() == op)
    }

    /// Returns true for the five object events.
    pub fn is_object_event(self) -> bool {
        matches!(
            self,
            EventOp::Create | EventOp::Update | EventOp::Enter | EventOp::Leave | EventOp::Delete
        )
    }
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `connect` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Application the session belongs to.
    pub application_id: String,
    /// Authenticated user session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Installation id of this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    /// Client key, for servers that require one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

/// `connected` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    /// Server-side id of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// `subscribe` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Application the subscription belongs to.
    pub application_id: String,
    /// Id the server echoes in every frame for this subscription.
    pub request_id: RequestId,
    /// Authenticated user session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// What to watch.
    pub query: QuerySpec,
}

/// `unsubscribe` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    /// Subscription to drop.
    pub request_id: RequestId,
}

/// `subscribed` and `unsubscribed` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAck {
    /// Acknowledged subscription.
    pub request_id: RequestId,
}

/// `create`, `update`, `enter`, `leave` and `delete` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEvent {
    /// Subscription the event belongs to.
    pub request_id: RequestId,
    /// The object as it is now.
    pub object: Value,
    /// The object before the change, when the server sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Value>,
}

/// `error` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Server error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message. Older servers send it as `error`.
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Subscription the error belongs to; absent for connection errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Whether the server suggests reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,
}

/// A decoded live query frame.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEventMessage {
    /// `connect`
    Connect(ConnectRequest),
    /// `connected`
    Connected(ConnectedEvent),
    /// `subscribe`
    Subscribe(SubscribeRequest),
    /// `subscribed`
    Subscribed(RequestAck),
    /// `create`
    Create(ObjectEvent),
    /// `update`
    Update(ObjectEvent),
    /// `enter`
    Enter(ObjectEvent),
    /// `leave`
    Leave(ObjectEvent),
    /// `delete`
    Delete(ObjectEvent),
    /// `unsubscribe`
    Unsubscribe(UnsubscribeRequest),
    /// `unsubscribed`
    Unsubscribed(RequestAck),
    /// `error`
    Error(ErrorEvent),
}

impl QueryEventMessage {
    /// Returns the frame's op.
    pub fn op(&self) -> EventOp {
        match self {
            QueryEventMessage::Connect(_) => EventOp::Connect,
            QueryEventMessage::Connected(_) => EventOp::Connected,
            QueryEventMessage::Subscribe(_) => EventOp::Subscribe,
            QueryEventMessage::Subscribed(_) => EventOp::Subscribed,
            QueryEventMessage::Create(_) => EventOp::Create,
            QueryEventMessage::Update(_) => EventOp::Update,
            QueryEventMessage::Enter(_) => EventOp::Enter,
            QueryEventMessage::Leave(_) => EventOp::Leave,
            QueryEventMessage::Delete(_) => EventOp::Delete,
            QueryEventMessage::Unsubscribe(_) => EventOp::Unsubscribe,
            QueryEventMessage::Unsubscribed(_) => EventOp::Unsubscribed,
            QueryEventMessage::Error(_) => EventOp::Error,
        }
    }

    /// Returns the subscription the frame belongs to, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            QueryEventMessage::Connect(_) | QueryEventMessage::Connected(_) => None,
            QueryEventMessage::Subscribe(m) => Some(m.request_id),
            QueryEventMessage::Subscribed(m) | QueryEventMessage::Unsubscribed(m) => {
                Some(m.request_id)
            }
            QueryEventMessage::Create(m)
            | QueryEventMessage::Update(m)
            | QueryEventMessage::Enter(m)
            | QueryEventMessage::Leave(m)
            | QueryEventMessage::Delete(m) => Some(m.request_id),
            QueryEventMessage::Unsubscribe(m) => Some(m.request_id),
            QueryEventMessage::Error(m) => m.request_id,
        }
    }

    /// Renders the frame as a JSON object with its `op`.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        let body = match self {
            QueryEventMessage::Connect(m) => serde_json::to_value(m)?,
            QueryEventMessage::Connected(m) => serde_json::to_value(m)?,
            QueryEventMessage::Subscribe(m) => serde_json::to_value(m)?,
            QueryEventMessage::Subscribed(m) | QueryEventMessage::Unsubscribed(m) => {
                serde_json::to_value(m)?
            }
            QueryEventMessage::Create(m)
            | QueryEventMessage::Update(m)
            | QueryEventMessage::Enter(m)
            | QueryEventMessage::Leave(m)
            | QueryEventMessage::Delete(m) => serde_json::to_value(m)?,
            QueryEventMessage::Unsubscribe(m) => serde_json::to_value(m)?,
            QueryEventMessage::Error(m) => serde_json::to_value(m)?,
        };

        let mut map = match body {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::malformed("frame body is not an object")),
        };
        map.insert("op".into(), Value::String(self.op().as_str().into()));
        Ok(Value::Object(map))
    }

    /// Parses a JSON object into a frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Malformed`] if the value is not an object or a
    ///   field has the wrong shape
    /// - [`ProtocolError::MissingField`] if there is no `op`
    /// - [`ProtocolError::UnknownOp`] for an unrecognized `op`
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::malformed(format!(
                    "expected an object, found {other}"
                )))
            }
        };

        let op = match map.remove("op") {
            Some(Value::String(op)) => op,
            Some(_) => return Err(ProtocolError::malformed("op must be a string")),
            None => return Err(ProtocolError::MissingField("op")),
        };
        let op = EventOp::parse(&op).ok_or(ProtocolError::UnknownOp(op))?;

        Ok(match op {
            EventOp::Connect => QueryEventMessage::Connect(body(op, map)?),
            EventOp::Connected => QueryEventMessage::Connected(body(op, map)?),
            EventOp::Subscribe => QueryEventMessage::Subscribe(body(op, map)?),
            EventOp::Subscribed => QueryEventMessage::Subscribed(body(op, map)?),
            EventOp::Create => QueryEventMessage::Create(body(op, map)?),
            EventOp::Update => QueryEventMessage::Update(body(op, map)?),
            EventOp::Enter => QueryEventMessage::Enter(body(op, map)?),
            EventOp::Leave => QueryEventMessage::Leave(body(op, map)?),
            EventOp::Delete => QueryEventMessage::Delete(body(op, map)?),
            EventOp::Unsubscribe => QueryEventMessage::Unsubscribe(body(op, map)?),
            EventOp::Unsubscribed => QueryEventMessage::Unsubscribed(body(op, map)?),
            EventOp::Error => QueryEventMessage::Error(body(op, map)?),
        })
    }

    /// Encodes the frame with `codec`.
    pub fn encode(&self, codec: &dyn Codec) -> ProtocolResult<Bytes> {
        codec.serialize(&self.to_value()?)
    }

    /// Decodes a frame with `codec`.
    pub fn decode(codec: &dyn Codec, bytes: &[u8]) -> ProtocolResult<Self> {
        Self::from_value(codec.deserialize(bytes)?)
    }
}

fn body<T: DeserializeOwned>(op: EventOp, map: Map<String, Value>) -> ProtocolResult<T> {
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ProtocolError::malformed(format!("{op} frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde_json::json;

    fn parse(value: Value) -> QueryEventMessage {
        QueryEventMessage::from_value(value).unwrap()
    }

    #[test]
    fn op_names_round_trip() {
        for op in EventOp::ALL {
            assert_eq!(EventOp::parse(op.as_str()), Some(op));
        }
        assert_eq!(EventOp::parse("ping"), None);
    }

    #[test]
    fn subscribed_frame() {
        let msg = parse(json!({"op": "subscribed", "requestId": 7}));
        assert_eq!(msg, QueryEventMessage::Subscribed(RequestAck { request_id: 7 }));
        assert_eq!(msg.request_id(), Some(7));
    }

    #[test]
    fn object_event_with_original() {
        let msg = parse(json!({
            "op": "update",
            "requestId": 3,
            "object": {"objectId": "x1", "n": 2},
            "original": {"objectId": "x1", "n": 1}
        }));
        match msg {
            QueryEventMessage::Update(event) => {
                assert_eq!(event.object["n"], json!(2));
                assert_eq!(event.original.unwrap()["n"], json!(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_frame_accepts_legacy_key() {
        let msg = parse(json!({"op": "error", "code": 1, "error": "bad", "reconnect": true}));
        assert_eq!(
            msg,
            QueryEventMessage::Error(ErrorEvent {
                code: Some(1),
                message: Some("bad".into()),
                request_id: None,
                reconnect: Some(true),
            })
        );
        assert_eq!(msg.request_id(), None);
    }

    #[test]
    fn connected_ignores_extra_fields() {
        let msg = parse(json!({"op": "connected", "clientId": "c1", "extra": 1}));
        assert_eq!(
            msg,
            QueryEventMessage::Connected(ConnectedEvent {
                client_id: Some("c1".into())
            })
        );
    }

    #[test]
    fn subscribe_frame_shape() {
        let msg = QueryEventMessage::Subscribe(SubscribeRequest {
            application_id: "app".into(),
            request_id: 7,
            session_token: None,
            query: QuerySpec::new("Item").where_equal_to("a", 1),
        });
        assert_eq!(
            msg.to_value().unwrap(),
            json!({
                "op": "subscribe",
                "applicationId": "app",
                "requestId": 7,
                "query": {"className": "Item", "where": {"a": 1}}
            })
        );
    }

    #[test]
    fn connect_frame_shape() {
        let msg = QueryEventMessage::Connect(ConnectRequest {
            application_id: "app".into(),
            session_token: Some("r:abc".into()),
            installation_id: None,
            client_key: None,
        });
        assert_eq!(
            msg.to_value().unwrap(),
            json!({"op": "connect", "applicationId": "app", "sessionToken": "r:abc"})
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(
            QueryEventMessage::from_value(json!({"requestId": 1})),
            Err(ProtocolError::MissingField("op"))
        ));
        assert!(matches!(
            QueryEventMessage::from_value(json!({"op": "ping"})),
            Err(ProtocolError::UnknownOp(op)) if op == "ping"
        ));
        assert!(matches!(
            QueryEventMessage::from_value(json!({"op": "create", "requestId": 1})),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            QueryEventMessage::from_value(json!([1])),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn codec_round_trip() {
        let codec = JsonCodec;
        let msg = QueryEventMessage::Unsubscribe(UnsubscribeRequest { request_id: 9 });
        let bytes = msg.encode(&codec).unwrap();
        assert_eq!(QueryEventMessage::decode(&codec, &bytes).unwrap(), msg);
    }

    proptest::proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..64)) {
            let _ = QueryEventMessage::decode(&JsonCodec, &bytes);
        }

        #[test]
        fn object_events_keep_request_id(id in 0u32..10_000, op_index in 4usize..9) {
            let op = EventOp::ALL[op_index];
            let msg = parse(json!({"op": op.as_str(), "requestId": id, "object": {}}));
            proptest::prop_assert_eq!(msg.op(), op);
            proptest::prop_assert_eq!(msg.request_id(), Some(id));
        }
    }
}
