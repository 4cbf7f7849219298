//! Test fixtures and client helpers.
//!
//! Provides ready-made configurations, temporary caches, a callback
//! recorder and tracing setup for tests.

use objsync_client::{ClientConfig, ClientContext, HttpClient, LiveQueryCallbacks, LiveQueryError};
use objsync_protocol::RequestId;
use objsync_storage::{FileCache, PersistentCache};
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Application id used by test configurations and loopback servers.
pub const TEST_APPLICATION_ID: &str = "test-app";
/// REST endpoint used by test configurations.
pub const TEST_SERVER_URL: &str = "http://localhost:1337/parse";
/// Live query endpoint used by test configurations.
pub const TEST_LIVE_QUERY_URL: &str = "ws://localhost:1337/parse";

/// Installs a tracing subscriber that writes to the test output.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Returns a configuration pointing at the loopback endpoints, with short
/// timeouts.
pub fn test_config() -> ClientConfig {
    ClientConfig::new(TEST_APPLICATION_ID, TEST_SERVER_URL)
        .with_live_query_url(TEST_LIVE_QUERY_URL)
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
}

/// Builds a context with [`test_config`] and in-memory defaults.
pub fn test_context() -> ClientContext {
    ClientContext::builder(test_config())
        .build()
        .expect("Failed to build test context")
}

/// Builds a context with [`test_config`] that sends REST calls to `http`.
pub fn test_context_with_http(http: Arc<dyn HttpClient>) -> ClientContext {
    ClientContext::builder(test_config())
        .with_http_client(http)
        .build()
        .expect("Failed to build test context")
}

/// A file-backed cache in a temporary directory.
///
/// Each call to [`TempCache::open`] returns a fresh handle on the same file,
/// which is how tests simulate a process restart.
pub struct TempCache {
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempCache {
    /// Creates an empty cache location.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("cache").join("objsync.json");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Opens a new handle on the cache file.
    pub fn open(&self) -> Arc<dyn PersistentCache> {
        Arc::new(FileCache::open_with_create_dirs(&self.path).expect("Failed to open file cache"))
    }

    /// Returns the cache file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TempCache {
    fn default() -> Self {
        Self::new()
    }
}

/// One callback invocation captured by an [`EventRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
    /// `on_connected`
    Connected,
    /// `on_subscribed`
    Subscribed(RequestId),
    /// `on_create`
    Create(T, RequestId),
    /// `on_update`
    Update(T, RequestId),
    /// `on_enter`
    Enter(T, RequestId),
    /// `on_leave`
    Leave(T, RequestId),
    /// `on_delete`
    Delete(T, RequestId),
    /// `on_unsubscribed`
    Unsubscribed(RequestId),
    /// `on_error`
    Error(LiveQueryError),
    /// `on_general_message`
    General(String),
}

/// Records every callback of a subscription, in delivery order.
pub struct EventRecorder<T> {
    events: Arc<Mutex<Vec<Recorded<T>>>>,
}

impl<T: Clone + Send + 'static> EventRecorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns callbacks that record into this recorder.
    pub fn callbacks(&self) -> LiveQueryCallbacks<T> {
        let connected = self.events.clone();
        let subscribed = self.events.clone();
        let create = self.events.clone();
        let update = self.events.clone();
        let enter = self.events.clone();
        let leave = self.events.clone();
        let delete = self.events.clone();
        let unsubscribed = self.events.clone();
        let error = self.events.clone();
        let general = self.events.clone();

        LiveQueryCallbacks::new()
            .on_connected(move || connected.lock().push(Recorded::Connected))
            .on_subscribed(move |id| subscribed.lock().push(Recorded::Subscribed(id)))
            .on_create(move |object, id| create.lock().push(Recorded::Create(object, id)))
            .on_update(move |object, id| update.lock().push(Recorded::Update(object, id)))
            .on_enter(move |object, id| enter.lock().push(Recorded::Enter(object, id)))
            .on_leave(move |object, id| leave.lock().push(Recorded::Leave(object, id)))
            .on_delete(move |object, id| delete.lock().push(Recorded::Delete(object, id)))
            .on_unsubscribed(move |id| unsubscribed.lock().push(Recorded::Unsubscribed(id)))
            .on_error(move |e| error.lock().push(Recorded::Error(e)))
            .on_general_message(move |m| general.lock().push(Recorded::General(m)))
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<Recorded<T>> {
        self.events.lock().clone()
    }

    /// Returns the recorded events, without general messages.
    pub fn significant(&self) -> Vec<Recorded<T>> {
        self.events
            .lock()
            .iter()
            .filter(|event| !matches!(event, Recorded::General(_)))
            .cloned()
            .collect()
    }

    /// Returns the recorded errors.
    pub fn errors(&self) -> Vec<LiveQueryError> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Error(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` significant events were recorded.
    ///
    /// Returns false if that does not happen within two seconds.
    pub async fn wait_for(&self, count: usize) -> bool {
        eventually(Duration::from_secs(2), || self.significant().len() >= count).await
    }
}

impl<T: Clone + Send + 'static> Default for EventRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Runs `future` on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}
