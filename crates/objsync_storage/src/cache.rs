//! Persistent cache trait definition.

use crate::error::StorageResult;
use std::collections::BTreeMap;

/// The full contents of a cache: string keys to string values.
///
/// A `BTreeMap` keeps serialized documents stable across saves.
pub type CacheContents = BTreeMap<String, String>;

/// A small persistent key-value store.
///
/// # Invariants
///
/// - `load` after a successful `save(c)` returns exactly `c`
/// - `save` replaces the whole document; there are no partial writes
/// - A cache that was never written loads as an empty map
/// - Caches must be `Send + Sync` so services can share them
///
/// # Implementors
///
/// - [`super::InMemoryCache`] - For testing
/// - [`super::FileCache`] - For persistent storage
pub trait PersistentCache: Send + Sync {
    /// Loads the whole cache document.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read or its
    /// contents cannot be parsed.
    fn load(&self) -> StorageResult<CacheContents>;

    /// Replaces the whole cache document with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn save(&self, contents: &CacheContents) -> StorageResult<()>;
}
