//! # objsync Testkit
//!
//! Test utilities for objsync.
//!
//! This crate provides:
//! - Fixtures: temporary caches, ready-made configurations, tracing setup
//! - Property-based test generators using proptest
//! - An in-process live query server that doubles as a transport
//! - An in-process REST server for flushes and cloud functions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_server() {
//!     let server = Arc::new(LoopbackLiveServer::new(TEST_APPLICATION_ID));
//!     let context = test_context();
//!     let connection = context.connect(server.clone()).await.unwrap();
//!     // ... subscribe, then server.publish(...)
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod live_server;
pub mod rest_server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::live_server::*;
    pub use crate::rest_server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use live_server::*;
pub use rest_server::*;
