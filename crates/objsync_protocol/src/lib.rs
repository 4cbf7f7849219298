//! # objsync Protocol
//!
//! Wire types for the live query protocol.
//!
//! This crate provides:
//! - [`QueryEventMessage`], the twelve frames exchanged over a live query
//!   connection
//! - [`QuerySpec`], the query a subscription watches
//! - the [`Codec`] contract and the default [`JsonCodec`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod query;

pub use codec::{Codec, JsonCodec};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ConnectRequest, ConnectedEvent, ErrorEvent, EventOp, ObjectEvent, QueryEventMessage,
    RequestAck, RequestId, SubscribeRequest, UnsubscribeRequest,
};
pub use query::QuerySpec;
