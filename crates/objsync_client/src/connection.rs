//! Live query connections.
//!
//! A [`Connection`] owns one [`LiveTransport`] and multiplexes any number of
//! [`LiveQueryClient`]s over it. A single receive task decodes inbound
//! frames and routes them by request id; connection-scoped errors are
//! broadcast to every subscription.

use crate::callbacks::LiveQueryCallbacks;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::live_query::{
    Disposition, FrameSink, LiveQueryClient, Subscriber, SubscriptionSettings,
};
use crate::registry::Decoder;
use crate::transport::LiveTransport;
use bytes::Bytes;
use objsync_protocol::{
    Codec, ConnectRequest, ConnectedEvent, QueryEventMessage, QuerySpec, RequestId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connect sent, waiting for `connected`.
    Connecting,
    /// Session established.
    Connected,
    /// The transport closed.
    Closed,
}

/// Parameters of a connection attempt.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Client configuration.
    pub config: ClientConfig,
    /// Frame codec.
    pub codec: Arc<dyn Codec>,
    /// User session, if logged in.
    pub session_token: Option<String>,
    /// Installation id sent in the connect frame.
    pub installation_id: Option<Uuid>,
}

impl ConnectOptions {
    /// Creates options with no session and no installation id.
    pub fn new(config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            config,
            codec,
            session_token: None,
            installation_id: None,
        }
    }

    /// Sets the session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Sets the installation id.
    pub fn with_installation_id(mut self, id: Uuid) -> Self {
        self.installation_id = Some(id);
        self
    }
}

struct ConnectionInner {
    transport: Arc<dyn LiveTransport>,
    options: ConnectOptions,
    state: RwLock<ConnectionState>,
    routes: Mutex<HashMap<RequestId, Arc<dyn Subscriber>>>,
    next_request_id: AtomicU32,
    handshake: Mutex<Option<oneshot::Sender<ClientResult<ConnectedEvent>>>>,
    client_id: RwLock<Option<String>>,
}

/// A multiplexed live query session.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Opens the transport, performs the connect handshake and starts the
    /// receive task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidConfig`] if the configuration is incomplete
    /// - [`ClientError::AuthenticationFailed`] if the server answers the
    ///   connect frame with an error
    /// - [`ClientError::Timeout`] if `connected` does not arrive within the
    ///   connect timeout
    /// - transport errors from [`LiveTransport::open`] and `send`
    pub async fn open(
        transport: Arc<dyn LiveTransport>,
        options: ConnectOptions,
    ) -> ClientResult<Connection> {
        options.config.validate()?;

        let url = options.config.effective_live_query_url().to_string();
        let inbound = transport.open(&url)?;
        info!(%url, codec = options.codec.name(), "opening live query connection");

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let inner = Arc::new(ConnectionInner {
            transport,
            options,
            state: RwLock::new(ConnectionState::Connecting),
            routes: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(1),
            handshake: Mutex::new(Some(handshake_tx)),
            client_id: RwLock::new(None),
        });

        tokio::spawn(receive_loop(Arc::downgrade(&inner), inbound));

        let connect = QueryEventMessage::Connect(ConnectRequest {
            application_id: inner.options.config.application_id.clone(),
            session_token: inner.options.session_token.clone(),
            installation_id: inner.options.installation_id.map(|id| id.to_string()),
            client_key: inner.options.config.client_key.clone(),
        });
        if let Err(e) = inner.send_frame(&connect) {
            inner.shutdown();
            return Err(e);
        }

        let outcome = match timeout(inner.options.config.connect_timeout, handshake_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout),
        };

        match outcome {
            Ok(event) => {
                info!(client_id = ?event.client_id, "live query session established");
                Ok(Connection { inner })
            }
            Err(e) => {
                warn!(error = %e, "live query handshake failed");
                inner.shutdown();
                Err(e)
            }
        }
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Returns true while the session is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.transport.is_connected()
    }

    /// Returns the session token the connection was opened with.
    pub fn session_token(&self) -> Option<&str> {
        self.inner.options.session_token.as_deref()
    }

    /// Returns the server-assigned session id, if the server sent one.
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.read().clone()
    }

    /// Returns the configuration the connection was opened with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.options.config
    }

    /// Returns the number of routed subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.routes.lock().len()
    }

    /// Allocates a request id unique on this connection.
    pub fn next_request_id(&self) -> RequestId {
        self.inner.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Creates a subscription in state `New` and routes its request id.
    ///
    /// Callbacks are delivered on the runtime current at this call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the connection is closed.
    pub fn live_query<T: Send + 'static>(
        &self,
        query: QuerySpec,
        callbacks: LiveQueryCallbacks<T>,
        decoder: Decoder<T>,
    ) -> ClientResult<LiveQueryClient<T>> {
        if self.state() == ConnectionState::Closed {
            return Err(ClientError::ConnectionClosed);
        }

        let request_id = self.next_request_id();
        let settings = SubscriptionSettings {
            application_id: self.inner.options.config.application_id.clone(),
            session_token: self.inner.options.session_token.clone(),
            request_timeout: self.inner.options.config.request_timeout,
        };
        let sink: Arc<dyn FrameSink> = self.inner.clone();
        let (client, subscriber) =
            LiveQueryClient::new(request_id, query, settings, callbacks, decoder, sink);

        {
            let mut routes = self.inner.routes.lock();
            if routes.contains_key(&request_id) {
                return Err(ClientError::DuplicateRequestId(request_id));
            }
            routes.insert(request_id, subscriber);
        }
        debug!(request_id, class = %client.query().class_name(), "subscription routed");

        if self.is_connected() {
            client.notify_connected();
        }
        Ok(client)
    }

    /// Closes the transport. Open subscriptions move to `Waiting` once the
    /// inbound stream ends.
    pub fn close(&self) -> ClientResult<()> {
        info!("closing live query connection");
        self.inner.transport.close()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl ConnectionInner {
    fn handle_frame(&self, frame: &[u8]) {
        let message = match QueryEventMessage::decode(self.options.codec.as_ref(), frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        match message {
            QueryEventMessage::Connected(event) => self.handle_connected(event),
            QueryEventMessage::Error(event) if event.request_id.is_none() => {
                if let Some(handshake) = self.handshake.lock().take() {
                    let message = event.message.unwrap_or_else(|| "connect rejected".into());
                    let _ = handshake.send(Err(ClientError::AuthenticationFailed(message)));
                    return;
                }
                let subscribers: Vec<_> = self.routes.lock().values().cloned().collect();
                warn!(code = ?event.code, message = ?event.message, subscribers = subscribers.len(), "connection error");
                for subscriber in subscribers {
                    subscriber.handle(QueryEventMessage::Error(event.clone()));
                }
            }
            message => self.route(message),
        }
    }

    fn handle_connected(&self, event: ConnectedEvent) {
        match self.handshake.lock().take() {
            Some(handshake) => {
                *self.state.write() = ConnectionState::Connected;
                self.client_id.write().clone_from(&event.client_id);
                let _ = handshake.send(Ok(event));
            }
            None => debug!("ignoring connected frame outside the handshake"),
        }
    }

    fn route(&self, message: QueryEventMessage) {
        let Some(request_id) = message.request_id() else {
            debug!(op = %message.op(), "dropping frame without request id");
            return;
        };

        let subscriber = self.routes.lock().get(&request_id).cloned();
        match subscriber {
            Some(subscriber) => {
                if subscriber.handle(message) == Disposition::Deregister {
                    self.routes.lock().remove(&request_id);
                }
            }
            None => debug!(request_id, op = %message.op(), "dropping unroutable frame"),
        }
    }

    fn on_stream_end(&self) {
        *self.state.write() = ConnectionState::Closed;
        if let Some(handshake) = self.handshake.lock().take() {
            let _ = handshake.send(Err(ClientError::ConnectionClosed));
        }

        let subscribers: Vec<_> = self.routes.lock().drain().map(|(_, s)| s).collect();
        info!(subscribers = subscribers.len(), "live query connection closed");
        for subscriber in subscribers {
            subscriber.connection_lost();
        }
    }

    fn shutdown(&self) {
        *self.state.write() = ConnectionState::Closed;
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "transport close failed");
        }
    }
}

impl FrameSink for ConnectionInner {
    fn send_frame(&self, message: &QueryEventMessage) -> ClientResult<()> {
        if *self.state.read() == ConnectionState::Closed {
            return Err(ClientError::ConnectionClosed);
        }
        let bytes: Bytes = message.encode(self.options.codec.as_ref())?;
        self.transport.send(bytes)
    }

    fn deregister(&self, request_id: RequestId) {
        if self.routes.lock().remove(&request_id).is_some() {
            debug!(request_id, "subscription deregistered");
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if self.transport.is_connected() {
            let _ = self.transport.close();
        }
    }
}

async fn receive_loop(inner: Weak<ConnectionInner>, mut inbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = inbound.recv().await {
        let Some(connection) = inner.upgrade() else {
            debug!("connection dropped, stopping receive loop");
            return;
        };
        connection.handle_frame(&frame);
    }

    if let Some(connection) = inner.upgrade() {
        connection.on_stream_end();
    }
}
