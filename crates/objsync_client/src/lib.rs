//! # objsync Client
//!
//! Live query subscriptions and remote object saving.
//!
//! This crate provides:
//! - [`Connection`]: one multiplexed live query session over a
//!   [`LiveTransport`]
//! - [`LiveQueryClient`]: a typed subscription with its state machine
//! - [`ClientContext`]: configuration, type registry, codec, installation
//!   identity and session, passed by reference
//! - [`flush`] / [`RestObjectStore`]: saving [`RemoteObject`] edits
//! - [`CloudInvoker`]: named server function calls
//!
//! The socket and HTTP libraries are abstracted behind [`LiveTransport`]
//! and [`HttpClient`]. Nothing here retries or reconnects on its own;
//! [`ClientError::is_retryable`] classifies errors for the caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use objsync_client::{ClientConfig, ClientContext, LiveQueryCallbacks, MockTransport};
//! use objsync_protocol::QuerySpec;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! # async fn run() -> objsync_client::ClientResult<()> {
//! let ctx = ClientContext::builder(ClientConfig::new("app", "wss://example.com")).build()?;
//! ctx.registry().register::<Value>("GameScore");
//!
//! let connection = ctx.connect(Arc::new(MockTransport::new())).await?;
//! let callbacks = LiveQueryCallbacks::new()
//!     .on_create(|score: Value, _| println!("new score {score}"));
//! let subscription = ctx
//!     .subscribe(&connection, QuerySpec::new("GameScore"), callbacks)
//!     .await?;
//! ctx.unsubscribe(&subscription).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`RemoteObject`]: objsync_core::RemoteObject

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod callbacks;
mod cloud;
mod config;
mod connection;
mod context;
mod dispatch;
mod error;
mod http;
mod live_query;
mod object_store;
mod registry;
mod transport;

pub use callbacks::{LiveQueryCallbacks, LiveQueryError};
pub use cloud::CloudInvoker;
pub use config::ClientConfig;
pub use connection::{ConnectOptions, Connection, ConnectionState};
pub use context::{ClientContext, ClientContextBuilder};
pub use dispatch::Dispatcher;
pub use error::{ClientError, ClientResult, EVENT_HANDLING_FAILED, SERVER_URL_MISSING};
pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer,
    RestEndpoint, APPLICATION_ID_HEADER, CLIENT_KEY_HEADER, INSTALLATION_ID_HEADER,
    SESSION_TOKEN_HEADER,
};
pub use live_query::{LiveQueryClient, LiveQueryState};
pub use object_store::{flush, RemoteStore, RestObjectStore};
pub use registry::{Decoder, TypeRegistry};
pub use transport::{acknowledging_responder, LiveTransport, MockTransport, Responder};
