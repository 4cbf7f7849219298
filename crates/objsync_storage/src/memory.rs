//! In-memory cache for testing.

use crate::cache::{CacheContents, PersistentCache};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An in-memory cache.
///
/// This cache keeps its document in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Processes that do not need identity to survive a restart
///
/// It also counts saves and can simulate an unreadable or read-only
/// store, which lets callers exercise their I/O failure paths.
///
/// # Example
///
/// ```rust
/// use objsync_storage::{InMemoryCache, PersistentCache};
///
/// let cache = InMemoryCache::new();
/// assert!(cache.load().unwrap().is_empty());
/// assert_eq!(cache.save_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCache {
    data: RwLock<CacheContents>,
    saves: AtomicUsize,
    read_only: AtomicBool,
    unreadable: AtomicBool,
}

impl InMemoryCache {
    /// Creates a new empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache with pre-existing contents.
    ///
    /// Useful for testing restarts.
    #[must_use]
    pub fn with_contents(contents: CacheContents) -> Self {
        Self {
            data: RwLock::new(contents),
            ..Self::default()
        }
    }

    /// Returns a copy of the current contents without going through `load`.
    #[must_use]
    pub fn contents(&self) -> CacheContents {
        self.data.read().clone()
    }

    /// Returns how many successful saves have happened.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes subsequent saves fail with [`StorageError::ReadOnly`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Makes subsequent loads fail with an I/O error.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }
}

impl PersistentCache for InMemoryCache {
    fn load(&self) -> StorageResult<CacheContents> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cache is unreadable",
            )));
        }
        Ok(self.data.read().clone())
    }

    fn save(&self, contents: &CacheContents) -> StorageResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        *self.data.write() = contents.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(pairs: &[(&str, &str)]) -> CacheContents {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn memory_new_is_empty() {
        let cache = InMemoryCache::new();
        assert!(cache.load().unwrap().is_empty());
        assert_eq!(cache.save_count(), 0);
    }

    #[test]
    fn memory_save_then_load() {
        let cache = InMemoryCache::new();
        let written = contents(&[("a", "1"), ("b", "2")]);

        cache.save(&written).unwrap();

        assert_eq!(cache.load().unwrap(), written);
        assert_eq!(cache.save_count(), 1);
    }

    #[test]
    fn memory_save_replaces_document() {
        let cache = InMemoryCache::with_contents(contents(&[("old", "x")]));
        cache.save(&contents(&[("new", "y")])).unwrap();

        let loaded = cache.load().unwrap();
        assert!(!loaded.contains_key("old"));
        assert_eq!(loaded.get("new").map(String::as_str), Some("y"));
    }

    #[test]
    fn memory_read_only_rejects_saves() {
        let cache = InMemoryCache::with_contents(contents(&[("k", "v")]));
        cache.set_read_only(true);

        let result = cache.save(&CacheContents::new());
        assert!(matches!(result, Err(StorageError::ReadOnly)));
        assert_eq!(cache.contents(), contents(&[("k", "v")]));
        assert_eq!(cache.save_count(), 0);
    }

    #[test]
    fn memory_unreadable_fails_loads() {
        let cache = InMemoryCache::new();
        cache.set_unreadable(true);
        assert!(matches!(cache.load(), Err(StorageError::Io(_))));

        cache.set_unreadable(false);
        assert!(cache.load().is_ok());
    }
}
