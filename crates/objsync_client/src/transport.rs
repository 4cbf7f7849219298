//! Transport layer abstraction for live query connections.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A duplex, message-oriented channel to the live query server.
///
/// This trait abstracts the socket library (WebSocket, in-process loopback,
/// mock for testing). Inbound frames are delivered on the receiver returned
/// by [`LiveTransport::open`]; the receiver ending means the server side
/// went away.
pub trait LiveTransport: Send + Sync {
    /// Opens the channel to `url` and returns the inbound frame stream.
    fn open(&self, url: &str) -> ClientResult<mpsc::UnboundedReceiver<Bytes>>;

    /// Sends one frame.
    fn send(&self, frame: Bytes) -> ClientResult<()>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the channel. The inbound stream ends.
    fn close(&self) -> ClientResult<()>;
}

/// Computes the frames a scripted server answers to one client frame.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// A scripted in-memory transport for testing.
///
/// Frames are JSON. By default the mock answers `connect` with `connected`,
/// `subscribe` with `subscribed` and `unsubscribe` with `unsubscribed`;
/// [`MockTransport::silent`] answers nothing. Tests inject server frames
/// with [`MockTransport::push`] and end the stream with
/// [`MockTransport::drop_connection`].
pub struct MockTransport {
    connected: AtomicBool,
    fail_open: AtomicBool,
    inbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    sent: Mutex<Vec<Value>>,
    responder: Mutex<Option<Responder>>,
}

impl MockTransport {
    /// Creates a mock that acknowledges connect, subscribe and unsubscribe.
    pub fn new() -> Self {
        let transport = Self::silent();
        transport.set_responder(acknowledging_responder());
        transport
    }

    /// Creates a mock that never answers on its own.
    pub fn silent() -> Self {
        Self {
            connected: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    /// Replaces the scripted responder.
    pub fn set_responder(&self, responder: Responder) {
        *self.responder.lock() = Some(responder);
    }

    /// Makes subsequent `open` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Delivers a server frame to the client.
    ///
    /// Returns false if the channel is not open.
    pub fn push(&self, frame: Value) -> bool {
        self.push_raw(Bytes::from(frame.to_string()))
    }

    /// Delivers raw bytes to the client.
    pub fn push_raw(&self, frame: Bytes) -> bool {
        match self.inbound.lock().as_ref() {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Ends the inbound stream as if the server disconnected.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound.lock().take();
    }

    /// Returns every frame the client sent, in order.
    pub fn sent_frames(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Returns the sent frames with the given `op`.
    pub fn sent_with_op(&self, op: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.get("op").and_then(Value::as_str) == Some(op))
            .cloned()
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &self.is_connected())
            .field("sent", &self.sent.lock().len())
            .finish_non_exhaustive()
    }
}

impl LiveTransport for MockTransport {
    fn open(&self, _url: &str) -> ClientResult<mpsc::UnboundedReceiver<Bytes>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ClientError::transport_retryable("mock open failure"));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(sender);
        self.connected.store(true, Ordering::SeqCst);
        Ok(receiver)
    }

    fn send(&self, frame: Bytes) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let value: Value = serde_json::from_slice(&frame)
            .map_err(|e| ClientError::transport_fatal(format!("mock expects json frames: {e}")))?;
        self.sent.lock().push(value.clone());

        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            for reply in responder(&value) {
                self.push(reply);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ClientResult<()> {
        self.drop_connection();
        Ok(())
    }
}

/// Answers connect, subscribe and unsubscribe the way a healthy server does.
pub fn acknowledging_responder() -> Responder {
    Arc::new(|frame: &Value| {
        let request_id = frame.get("requestId").cloned();
        match frame.get("op").and_then(Value::as_str) {
            Some("connect") => vec![json!({"op": "connected"})],
            Some("subscribe") => vec![json!({"op": "subscribed", "requestId": request_id})],
            Some("unsubscribe") => vec![json!({"op": "unsubscribed", "requestId": request_id})],
            _ => Vec::new(),
        }
    })
}
