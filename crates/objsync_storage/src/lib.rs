//! # objsync Storage
//!
//! Persistent key-value cache contract and implementations for objsync.
//!
//! The cache is the only durable state a client keeps on its own: small
//! string values (installation id, session hints) keyed by name. Caches are
//! **opaque string maps**. They do not interpret what they store.
//!
//! ## Available Caches
//!
//! - [`InMemoryCache`] - For testing and ephemeral processes
//! - [`FileCache`] - A JSON document on disk, written atomically
//!
//! ## Example
//!
//! ```rust
//! use objsync_storage::{CacheContents, InMemoryCache, PersistentCache};
//!
//! let cache = InMemoryCache::new();
//! let mut contents = CacheContents::new();
//! contents.insert("greeting".into(), "hello".into());
//! cache.save(&contents).unwrap();
//! assert_eq!(cache.load().unwrap().get("greeting").map(String::as_str), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod file;
mod memory;

pub use cache::{CacheContents, PersistentCache};
pub use error::{StorageError, StorageResult};
pub use file::FileCache;
pub use memory::InMemoryCache;
