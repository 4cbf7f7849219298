//! Subscriber callbacks.

use objsync_protocol::{EventOp, RequestId};

type Handler<A> = Box<dyn Fn(A) + Send + Sync>;
type ObjectHandler<T> = Box<dyn Fn(T, RequestId) + Send + Sync>;

/// An error reported to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveQueryError {
    /// Server or local error code.
    pub code: i64,
    /// Description.
    pub message: String,
    /// Subscription the error was raised for; `None` for connection errors.
    pub request_id: Option<RequestId>,
    /// Whether the server suggested reconnecting.
    pub reconnect: bool,
}

/// Typed callbacks of one live query subscription.
///
/// Every callback is optional. Callbacks run on the subscriber's dispatcher,
/// never on the connection's receive task.
pub struct LiveQueryCallbacks<T> {
    pub(crate) on_connected: Option<Handler<()>>,
    pub(crate) on_subscribed: Option<Handler<RequestId>>,
    pub(crate) on_create: Option<ObjectHandler<T>>,
    pub(crate) on_update: Option<ObjectHandler<T>>,
    pub(crate) on_enter: Option<ObjectHandler<T>>,
    pub(crate) on_leave: Option<ObjectHandler<T>>,
    pub(crate) on_delete: Option<ObjectHandler<T>>,
    pub(crate) on_unsubscribed: Option<Handler<RequestId>>,
    pub(crate) on_error: Option<Handler<LiveQueryError>>,
    pub(crate) on_general_message: Option<Handler<String>>,
}

impl<T> LiveQueryCallbacks<T> {
    /// Creates an empty callback set.
    pub fn new() -> Self {
        Self {
            on_connected: None,
            on_subscribed: None,
            on_create: None,
            on_update: None,
            on_enter: None,
            on_leave: None,
            on_delete: None,
            on_unsubscribed: None,
            on_error: None,
            on_general_message: None,
        }
    }

    /// Called once when the subscription is attached to a connected session.
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Box::new(move |()| f()));
        self
    }

    /// Called when the server accepts the subscription.
    pub fn on_subscribed(mut self, f: impl Fn(RequestId) + Send + Sync + 'static) -> Self {
        self.on_subscribed = Some(Box::new(f));
        self
    }

    /// Called for `create` events.
    pub fn on_create(mut self, f: impl Fn(T, RequestId) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Box::new(f));
        self
    }

    /// Called for `update` events.
    pub fn on_update(mut self, f: impl Fn(T, RequestId) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Called for `enter` events.
    pub fn on_enter(mut self, f: impl Fn(T, RequestId) + Send + Sync + 'static) -> Self {
        self.on_enter = Some(Box::new(f));
        self
    }

    /// Called for `leave` events.
    pub fn on_leave(mut self, f: impl Fn(T, RequestId) + Send + Sync + 'static) -> Self {
        self.on_leave = Some(Box::new(f));
        self
    }

    /// Called for `delete` events.
    pub fn on_delete(mut self, f: impl Fn(T, RequestId) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }

    /// Called when the server confirms the subscription is gone.
    pub fn on_unsubscribed(mut self, f: impl Fn(RequestId) + Send + Sync + 'static) -> Self {
        self.on_unsubscribed = Some(Box::new(f));
        self
    }

    /// Called for server errors and events that could not be handled.
    pub fn on_error(mut self, f: impl Fn(LiveQueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called with a short description of every frame routed to this
    /// subscription.
    pub fn on_general_message(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_general_message = Some(Box::new(f));
        self
    }

    pub(crate) fn object_handler(&self, op: EventOp) -> Option<&ObjectHandler<T>> {
        match op {
            EventOp::Create => self.on_create.as_ref(),
            EventOp::Update => self.on_update.as_ref(),
            EventOp::Enter => self.on_enter.as_ref(),
            EventOp::Leave => self.on_leave.as_ref(),
            EventOp::Delete => self.on_delete.as_ref(),
            _ => None,
        }
    }
}

impl<T> Default for LiveQueryCallbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LiveQueryCallbacks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueryCallbacks")
            .field("on_create", &self.on_create.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_enter", &self.on_enter.is_some())
            .field("on_leave", &self.on_leave.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
