//! Live query subscriptions.
//!
//! A [`LiveQueryClient`] is one subscription multiplexed over a shared
//! connection. It moves through [`LiveQueryState`]:
//!
//! ```text
//! New --subscribe()--> Opening --subscribed--> Open --unsubscribe()--> Closing --unsubscribed--> Closed
//!                                               |
//!                                               +--connection lost--> Waiting
//! ```
//!
//! Object events are delivered only while `Open`. Error frames are reported
//! in every state and never change it. Frames with no transition from the
//! current state are logged and dropped.

use crate::callbacks::{LiveQueryCallbacks, LiveQueryError};
use crate::dispatch::Dispatcher;
use crate::error::{ClientError, ClientResult, EVENT_HANDLING_FAILED};
use crate::registry::Decoder;
use objsync_protocol::{
    ErrorEvent, EventOp, QueryEventMessage, QuerySpec, RequestId, SubscribeRequest,
    UnsubscribeRequest,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// State of a live query subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveQueryState {
    /// Created, nothing sent yet.
    New,
    /// Subscribe sent, waiting for the server.
    Opening,
    /// Receiving events.
    Open,
    /// Was open when the connection went away.
    Waiting,
    /// Unsubscribe sent, waiting for the server.
    Closing,
    /// Unsubscribed; no further events are delivered.
    Closed,
}

impl fmt::Display for LiveQueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the connection should do with a route after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Keep,
    Deregister,
}

/// Outbound side of a connection, as seen by a subscription.
pub(crate) trait FrameSink: Send + Sync {
    fn send_frame(&self, message: &QueryEventMessage) -> ClientResult<()>;
    fn deregister(&self, request_id: RequestId);
}

/// Inbound side of a subscription, as seen by a connection.
pub(crate) trait Subscriber: Send + Sync {
    fn handle(&self, message: QueryEventMessage) -> Disposition;
    fn connection_lost(&self);
    fn state(&self) -> LiveQueryState;
}

/// Settings a subscription inherits from its connection.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionSettings {
    pub application_id: String,
    pub session_token: Option<String>,
    pub request_timeout: Duration,
}

struct Pending {
    action: &'static str,
    reply: oneshot::Sender<ClientResult<()>>,
}

struct SubscriptionCore<T> {
    request_id: RequestId,
    query: QuerySpec,
    settings: SubscriptionSettings,
    state: Mutex<LiveQueryState>,
    pending: Mutex<Option<Pending>>,
    callbacks: Arc<LiveQueryCallbacks<T>>,
    decoder: Decoder<T>,
    dispatcher: Dispatcher,
}

impl<T: Send + 'static> SubscriptionCore<T> {
    fn current(&self) -> LiveQueryState {
        *self.state.lock()
    }

    fn transition(&self, from: LiveQueryState, to: LiveQueryState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn begin(
        &self,
        from: LiveQueryState,
        to: LiveQueryState,
        action: &'static str,
    ) -> ClientResult<oneshot::Receiver<ClientResult<()>>> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(ClientError::InvalidStateTransition {
                from: state.to_string(),
                action: action.to_string(),
            });
        }
        *state = to;

        let (reply, receiver) = oneshot::channel();
        *self.pending.lock() = Some(Pending { action, reply });
        Ok(receiver)
    }

    fn abort(&self, back_to: LiveQueryState) {
        *self.state.lock() = back_to;
        self.pending.lock().take();
    }

    fn resolve(&self, result: ClientResult<()>) {
        if let Some(pending) = self.pending.lock().take() {
            debug!(request_id = self.request_id, action = pending.action, ok = result.is_ok(), "resolving pending request");
            let _ = pending.reply.send(result);
        }
    }

    fn ignore(&self, op: EventOp) {
        debug!(
            request_id = self.request_id,
            %op,
            state = %self.current(),
            "frame has no transition from current state, ignoring"
        );
    }

    fn report_error(&self, error: LiveQueryError) {
        let callbacks = self.callbacks.clone();
        self.dispatcher.dispatch(move || {
            if let Some(on_error) = &callbacks.on_error {
                on_error(error);
            }
        });
    }

    fn notify_general(&self, op: EventOp) {
        if self.callbacks.on_general_message.is_none() {
            return;
        }
        let callbacks = self.callbacks.clone();
        let message = format!("received {op} for request {}", self.request_id);
        self.dispatcher.dispatch(move || {
            if let Some(f) = &callbacks.on_general_message {
                f(message);
            }
        });
    }

    fn notify_request(&self, op: EventOp) {
        let callbacks = self.callbacks.clone();
        let request_id = self.request_id;
        self.dispatcher.dispatch(move || {
            let handler = match op {
                EventOp::Subscribed => &callbacks.on_subscribed,
                _ => &callbacks.on_unsubscribed,
            };
            if let Some(f) = handler {
                f(request_id);
            }
        });
    }

    fn deliver_object(&self, op: EventOp, object: Value) {
        match self.decoder.decode(object) {
            Ok(decoded) => {
                let callbacks = self.callbacks.clone();
                let request_id = self.request_id;
                self.dispatcher.dispatch(move || {
                    if let Some(handler) = callbacks.object_handler(op) {
                        handler(decoded, request_id);
                    }
                });
            }
            Err(e) => {
                warn!(request_id = self.request_id, %op, error = %e, "failed to decode event object");
                self.report_error(LiveQueryError {
                    code: EVENT_HANDLING_FAILED,
                    message: format!("failed to handle {op} event: {e}"),
                    request_id: Some(self.request_id),
                    reconnect: false,
                });
            }
        }
    }

    fn handle_error(&self, event: ErrorEvent) {
        let code = event.code.unwrap_or_default();
        let message = event.message.unwrap_or_default();
        warn!(request_id = self.request_id, code, %message, "live query error");

        self.resolve(Err(ClientError::Subscription {
            code,
            message: message.clone(),
        }));
        self.report_error(LiveQueryError {
            code,
            message,
            request_id: event.request_id,
            reconnect: event.reconnect.unwrap_or(false),
        });
    }
}

impl<T: Send + 'static> Subscriber for SubscriptionCore<T> {
    fn handle(&self, message: QueryEventMessage) -> Disposition {
        let op = message.op();
        self.notify_general(op);

        match message {
            QueryEventMessage::Subscribed(_) => {
                if self.transition(LiveQueryState::Opening, LiveQueryState::Open) {
                    info!(request_id = self.request_id, class = %self.query.class_name(), "subscribed");
                    self.resolve(Ok(()));
                    self.notify_request(op);
                } else {
                    self.ignore(op);
                }
            }
            QueryEventMessage::Unsubscribed(_) => {
                if self.transition(LiveQueryState::Closing, LiveQueryState::Closed) {
                    info!(request_id = self.request_id, "unsubscribed");
                    self.resolve(Ok(()));
                    self.notify_request(op);
                    return Disposition::Deregister;
                }
                self.ignore(op);
            }
            QueryEventMessage::Create(event)
            | QueryEventMessage::Update(event)
            | QueryEventMessage::Enter(event)
            | QueryEventMessage::Leave(event)
            | QueryEventMessage::Delete(event) => {
                if self.current() == LiveQueryState::Open {
                    self.deliver_object(op, event.object);
                } else {
                    self.ignore(op);
                }
            }
            QueryEventMessage::Error(event) => self.handle_error(event),
            _ => self.ignore(op),
        }
        Disposition::Keep
    }

    fn connection_lost(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == LiveQueryState::Open {
                *state = LiveQueryState::Waiting;
            }
            previous
        };
        warn!(request_id = self.request_id, state = %previous, "connection lost");

        if matches!(previous, LiveQueryState::Opening | LiveQueryState::Closing) {
            self.resolve(Err(ClientError::ConnectionClosed));
        }
    }

    fn state(&self) -> LiveQueryState {
        self.current()
    }
}

/// One live query subscription.
///
/// Dropping the client removes its route from the connection; events for
/// its request id are dropped from then on.
pub struct LiveQueryClient<T: Send + 'static> {
    core: Arc<SubscriptionCore<T>>,
    sink: Arc<dyn FrameSink>,
}

impl<T: Send + 'static> LiveQueryClient<T> {
    pub(crate) fn new(
        request_id: RequestId,
        query: QuerySpec,
        settings: SubscriptionSettings,
        callbacks: LiveQueryCallbacks<T>,
        decoder: Decoder<T>,
        sink: Arc<dyn FrameSink>,
    ) -> (Self, Arc<dyn Subscriber>) {
        let core = Arc::new(SubscriptionCore {
            request_id,
            query,
            settings,
            state: Mutex::new(LiveQueryState::New),
            pending: Mutex::new(None),
            callbacks: Arc::new(callbacks),
            decoder,
            dispatcher: Dispatcher::capture(),
        });
        let subscriber: Arc<dyn Subscriber> = core.clone();
        (Self { core, sink }, subscriber)
    }

    /// Returns the request id routing this subscription's frames.
    pub fn request_id(&self) -> RequestId {
        self.core.request_id
    }

    /// Returns the watched query.
    pub fn query(&self) -> &QuerySpec {
        &self.core.query
    }

    /// Returns the current state.
    pub fn state(&self) -> LiveQueryState {
        self.core.current()
    }

    /// Sends the subscribe request and waits for the server's answer.
    ///
    /// Dropping the returned future leaves the state at `Opening`; nothing is
    /// retried.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidStateTransition`] unless the state is `New`
    /// - [`ClientError::Subscription`] if the server answers with an error
    /// - [`ClientError::Timeout`] or [`ClientError::ConnectionClosed`]
    pub async fn subscribe(&self) -> ClientResult<()> {
        let reply = self
            .core
            .begin(LiveQueryState::New, LiveQueryState::Opening, "subscribe")?;

        let frame = QueryEventMessage::Subscribe(SubscribeRequest {
            application_id: self.core.settings.application_id.clone(),
            request_id: self.core.request_id,
            session_token: self.core.settings.session_token.clone(),
            query: self.core.query.clone(),
        });
        if let Err(e) = self.sink.send_frame(&frame) {
            self.core.abort(LiveQueryState::New);
            return Err(e);
        }
        debug!(request_id = self.core.request_id, "subscribe sent");

        self.await_reply(reply).await
    }

    /// Sends the unsubscribe request and waits for the server's answer.
    ///
    /// # Errors
    ///
    /// Same as [`LiveQueryClient::subscribe`], with `Open` as the required
    /// starting state.
    pub async fn unsubscribe(&self) -> ClientResult<()> {
        let reply = self
            .core
            .begin(LiveQueryState::Open, LiveQueryState::Closing, "unsubscribe")?;

        let frame = QueryEventMessage::Unsubscribe(UnsubscribeRequest {
            request_id: self.core.request_id,
        });
        if let Err(e) = self.sink.send_frame(&frame) {
            self.core.abort(LiveQueryState::Open);
            return Err(e);
        }
        debug!(request_id = self.core.request_id, "unsubscribe sent");

        self.await_reply(reply).await
    }

    pub(crate) fn notify_connected(&self) {
        let callbacks = self.core.callbacks.clone();
        self.core.dispatcher.dispatch(move || {
            if let Some(f) = &callbacks.on_connected {
                f(());
            }
        });
    }

    async fn await_reply(&self, reply: oneshot::Receiver<ClientResult<()>>) -> ClientResult<()> {
        match timeout(self.core.settings.request_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                warn!(request_id = self.core.request_id, state = %self.state(), "request timed out");
                Err(ClientError::Timeout)
            }
        }
    }
}

impl<T: Send + 'static> Drop for LiveQueryClient<T> {
    fn drop(&mut self) {
        self.sink.deregister(self.core.request_id);
    }
}

impl<T: Send + 'static> fmt::Debug for LiveQueryClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQueryClient")
            .field("request_id", &self.core.request_id)
            .field("class", &self.core.query.class_name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use objsync_protocol::{ObjectEvent, RequestAck};
    use serde_json::json;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<QueryEventMessage>>,
        deregistered: Mutex<Vec<RequestId>>,
        fail: bool,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, message: &QueryEventMessage) -> ClientResult<()> {
            if self.fail {
                return Err(ClientError::NotConnected);
            }
            self.frames.lock().push(message.clone());
            Ok(())
        }

        fn deregister(&self, request_id: RequestId) {
            self.deregistered.lock().push(request_id);
        }
    }

    fn settings() -> SubscriptionSettings {
        SubscriptionSettings {
            application_id: "app".into(),
            session_token: Some("r:token".into()),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn recording_callbacks(events: mpsc::UnboundedSender<String>) -> LiveQueryCallbacks<Value> {
        let on_sub = events.clone();
        let on_create = events.clone();
        let on_unsub = events.clone();
        let on_error = events;
        LiveQueryCallbacks::new()
            .on_subscribed(move |id| {
                let _ = on_sub.send(format!("subscribed:{id}"));
            })
            .on_create(move |obj: Value, id| {
                let _ = on_create.send(format!("create:{id}:{}", obj["id"]));
            })
            .on_unsubscribed(move |id| {
                let _ = on_unsub.send(format!("unsubscribed:{id}"));
            })
            .on_error(move |e| {
                let _ = on_error.send(format!("error:{}:{}", e.code, e.message));
            })
    }

    fn client(
        sink: Arc<RecordingSink>,
    ) -> (
        LiveQueryClient<Value>,
        Arc<dyn Subscriber>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let registry = TypeRegistry::new();
        registry.register::<Value>("Item");
        let (tx, rx) = mpsc::unbounded_channel();
        let (client, subscriber) = LiveQueryClient::new(
            7,
            QuerySpec::new("Item"),
            settings(),
            recording_callbacks(tx),
            registry.decoder::<Value>("Item").unwrap(),
            sink,
        );
        (client, subscriber, rx)
    }

    fn create(id: &str) -> QueryEventMessage {
        QueryEventMessage::Create(ObjectEvent {
            request_id: 7,
            object: json!({"id": id}),
            original: None,
        })
    }

    async fn open(client: &LiveQueryClient<Value>, subscriber: &Arc<dyn Subscriber>) {
        let (result, _) = tokio::join!(client.subscribe(), async {
            subscriber.handle(QueryEventMessage::Subscribed(RequestAck { request_id: 7 }))
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn subscribe_then_create() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, mut events) = client(sink.clone());
        assert_eq!(client.state(), LiveQueryState::New);

        open(&client, &subscriber).await;
        assert_eq!(client.state(), LiveQueryState::Open);

        match &sink.frames.lock()[0] {
            QueryEventMessage::Subscribe(request) => {
                assert_eq!(request.request_id, 7);
                assert_eq!(request.session_token.as_deref(), Some("r:token"));
            }
            other => panic!("unexpected frame {other:?}"),
        }

        subscriber.handle(create("x1"));
        assert_eq!(events.recv().await.unwrap(), "subscribed:7");
        assert_eq!(events.recv().await.unwrap(), "create:7:\"x1\"");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscribed_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, mut events) = client(sink);
        open(&client, &subscriber).await;

        subscriber.handle(QueryEventMessage::Subscribed(RequestAck { request_id: 7 }));
        subscriber.handle(create("x2"));

        assert_eq!(events.recv().await.unwrap(), "subscribed:7");
        assert_eq!(events.recv().await.unwrap(), "create:7:\"x2\"");
    }

    #[tokio::test]
    async fn events_before_open_are_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, mut events) = client(sink);

        assert_eq!(subscriber.handle(create("early")), Disposition::Keep);
        open(&client, &subscriber).await;

        assert_eq!(events.recv().await.unwrap(), "subscribed:7");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_closes_and_deregisters() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, mut events) = client(sink.clone());
        open(&client, &subscriber).await;

        let (result, disposition) = tokio::join!(client.unsubscribe(), async {
            subscriber.handle(QueryEventMessage::Unsubscribed(RequestAck { request_id: 7 }))
        });
        result.unwrap();
        assert_eq!(disposition, Disposition::Deregister);
        assert_eq!(client.state(), LiveQueryState::Closed);

        subscriber.handle(create("late"));
        assert_eq!(events.recv().await.unwrap(), "subscribed:7");
        assert_eq!(events.recv().await.unwrap(), "unsubscribed:7");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_rejects_pending_subscribe_and_keeps_state() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, mut events) = client(sink);

        let (result, _) = tokio::join!(client.subscribe(), async {
            subscriber.handle(QueryEventMessage::Error(ErrorEvent {
                code: Some(101),
                message: Some("denied".into()),
                request_id: Some(7),
                reconnect: None,
            }))
        });

        assert!(matches!(
            result,
            Err(ClientError::Subscription { code: 101, .. })
        ));
        assert_eq!(client.state(), LiveQueryState::Opening);
        assert_eq!(events.recv().await.unwrap(), "error:101:denied");
    }

    #[tokio::test]
    async fn undecodable_object_reports_event_handling_failure() {
        let sink = Arc::new(RecordingSink::default());
        let registry = TypeRegistry::new();
        registry.register::<u64>("Item");
        let (tx, mut events) = mpsc::unbounded_channel();
        let errors = tx.clone();
        let (client, subscriber) = LiveQueryClient::new(
            7,
            QuerySpec::new("Item"),
            settings(),
            LiveQueryCallbacks::new().on_error(move |e: LiveQueryError| {
                let _ = errors.send(format!("error:{}", e.code));
            }),
            registry.decoder::<u64>("Item").unwrap(),
            sink,
        );
        drop(tx);

        let (result, _) = tokio::join!(client.subscribe(), async {
            subscriber.handle(QueryEventMessage::Subscribed(RequestAck { request_id: 7 }))
        });
        result.unwrap();
        subscriber.handle(create("x1"));

        assert_eq!(events.recv().await.unwrap(), format!("error:{EVENT_HANDLING_FAILED}"));
        assert_eq!(client.state(), LiveQueryState::Open);
    }

    #[tokio::test]
    async fn invalid_transitions() {
        let sink = Arc::new(RecordingSink::default());
        let (client, _subscriber, _events) = client(sink);

        assert!(matches!(
            client.unsubscribe().await,
            Err(ClientError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn send_failure_rolls_back_to_new() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let (client, _subscriber, _events) = client(sink);

        assert!(matches!(client.subscribe().await, Err(ClientError::NotConnected)));
        assert_eq!(client.state(), LiveQueryState::New);
    }

    #[tokio::test]
    async fn cancelled_subscribe_stays_opening() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, _events) = client(sink);

        let attempt = tokio::time::timeout(Duration::from_millis(20), client.subscribe()).await;
        assert!(attempt.is_err());
        assert_eq!(client.state(), LiveQueryState::Opening);

        subscriber.handle(QueryEventMessage::Subscribed(RequestAck { request_id: 7 }));
        assert_eq!(client.state(), LiveQueryState::Open);
    }

    #[tokio::test]
    async fn connection_lost_moves_open_to_waiting() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, _events) = client(sink);
        open(&client, &subscriber).await;

        subscriber.connection_lost();
        assert_eq!(client.state(), LiveQueryState::Waiting);
        assert_eq!(subscriber.state(), LiveQueryState::Waiting);
    }

    #[tokio::test]
    async fn connection_lost_fails_pending_request() {
        let sink = Arc::new(RecordingSink::default());
        let (client, subscriber, _events) = client(sink);

        let (result, _) = tokio::join!(client.subscribe(), async {
            subscriber.connection_lost();
        });
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn drop_deregisters() {
        let sink = Arc::new(RecordingSink::default());
        let (client, _subscriber, _events) = client(sink.clone());
        drop(client);
        assert_eq!(*sink.deregistered.lock(), vec![7]);
    }
}
