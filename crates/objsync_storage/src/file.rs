//! File-based cache for persistent storage.

use crate::cache::{CacheContents, PersistentCache};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A file-based cache.
///
/// The document is a single JSON object of string values. Contents survive
/// process restarts.
///
/// # Durability
///
/// `save` writes a sibling temporary file, syncs it, and renames it over the
/// target, so a crash mid-write leaves either the old or the new document.
/// An exclusive `fs2` lock on a `.lock` sibling serializes writers across
/// processes sharing the same path.
///
/// # Example
///
/// ```no_run
/// use objsync_storage::{CacheContents, FileCache, PersistentCache};
/// use std::path::Path;
///
/// let cache = FileCache::open_with_create_dirs(Path::new("state/cache.json")).unwrap();
/// let mut contents = cache.load().unwrap();
/// contents.insert("InstallationId".into(), "...".into());
/// cache.save(&contents).unwrap();
/// ```
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCache {
    /// Opens a file cache at the given path.
    ///
    /// The file is not created until the first save.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` names a directory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cache path {} is a directory", path.display()),
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Opens a file cache, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the cache document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn write_atomically(&self, contents: &CacheContents) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(contents)?;
        let tmp_path = self.sibling(".tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl PersistentCache for FileCache {
    fn load(&self) -> StorageResult<CacheContents> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheContents::new()),
            Err(e) => return Err(e.into()),
        };

        if text.trim().is_empty() {
            return Ok(CacheContents::new());
        }

        serde_json::from_str(&text).map_err(|e| {
            StorageError::Corrupted(format!("{}: {}", self.path.display(), e))
        })
    }

    fn save(&self, contents: &CacheContents) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sibling(".lock"))?;
        lock_file.lock_exclusive()?;

        let result = self.write_atomically(contents);

        lock_file.unlock()?;
        result
    }
}
