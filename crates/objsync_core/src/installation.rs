//! Installation identity.
//!
//! Each client installation is identified by a random v4 UUID generated on
//! first use and kept in the persistent cache under [`INSTALLATION_ID_KEY`].

use crate::error::CoreResult;
use objsync_storage::PersistentCache;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cache key of the installation id.
pub const INSTALLATION_ID_KEY: &str = "InstallationId";

/// An installation id and the cache key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    /// The installation id.
    pub id: Uuid,
    /// Cache key holding `id`.
    pub key: String,
}

/// Loads, creates and persists the installation id.
///
/// Reads of an already known id take a shared lock and do no I/O. The first
/// lookup and every overwrite run under an async mutex, so concurrent first
/// callers see one id and cause one cache write.
pub struct InstallationService {
    cache: Arc<dyn PersistentCache>,
    current: RwLock<Option<Uuid>>,
    io_lock: Mutex<()>,
}

impl InstallationService {
    /// Creates a service backed by `cache`.
    pub fn new(cache: Arc<dyn PersistentCache>) -> Self {
        Self {
            cache,
            current: RwLock::new(None),
            io_lock: Mutex::new(()),
        }
    }

    /// Returns the installation id, creating and persisting one if needed.
    ///
    /// A stored value that is not a valid UUID is replaced with a new id and
    /// a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cache`](crate::CoreError::Cache) if the cache cannot be read or written.
    pub async fn get(&self) -> CoreResult<Uuid> {
        if let Some(id) = self.peek() {
            return Ok(id);
        }

        let _guard = self.io_lock.lock().await;
        if let Some(id) = self.peek() {
            return Ok(id);
        }

        let mut contents = self.cache.load()?;
        if let Some(raw) = contents.get(INSTALLATION_ID_KEY) {
            match Uuid::parse_str(raw) {
                Ok(id) => {
                    debug!(%id, "loaded installation id");
                    *self.current.write() = Some(id);
                    return Ok(id);
                }
                Err(e) => warn!(value = %raw, error = %e, "stored installation id is invalid, replacing it"),
            }
        }

        let id = Uuid::new_v4();
        contents.insert(INSTALLATION_ID_KEY.to_string(), id.to_string());
        self.cache.save(&contents)?;
        *self.current.write() = Some(id);
        info!(%id, "created installation id");
        Ok(id)
    }

    /// Overwrites (`Some`) or removes (`None`) the installation id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cache`](crate::CoreError::Cache) if the cache cannot be read or
    /// written. The in-memory id is left unchanged in that case.
    pub async fn set(&self, id: Option<Uuid>) -> CoreResult<()> {
        let _guard = self.io_lock.lock().await;

        let mut contents = self.cache.load()?;
        match id {
            Some(id) => {
                contents.insert(INSTALLATION_ID_KEY.to_string(), id.to_string());
            }
            None => {
                contents.remove(INSTALLATION_ID_KEY);
            }
        }
        self.cache.save(&contents)?;
        *self.current.write() = id;
        debug!(?id, "installation id updated");
        Ok(())
    }

    /// Removes the installation id; the next `get` creates a new one.
    pub async fn clear(&self) -> CoreResult<()> {
        self.set(None).await
    }

    /// Returns the installation id, falling back to an id that lives only in
    /// memory when the cache is unusable.
    pub async fn get_or_ephemeral(&self) -> Uuid {
        match self.get().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "installation cache unavailable, using an in-memory id");
                let mut current = self.current.write();
                *current.get_or_insert_with(Uuid::new_v4)
            }
        }
    }

    /// Returns the installation id together with its cache key.
    pub async fn record(&self) -> CoreResult<InstallationRecord> {
        Ok(InstallationRecord {
            id: self.get().await?,
            key: INSTALLATION_ID_KEY.to_string(),
        })
    }

    /// Returns the id already known in memory, without any I/O.
    pub fn peek(&self) -> Option<Uuid> {
        *self.current.read()
    }
}

impl std::fmt::Debug for InstallationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationService")
            .field("current", &self.peek())
            .finish_non_exhaustive()
    }
}
