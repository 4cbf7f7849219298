//! The client context.
//!
//! Everything a client needs (configuration, type registry, codec,
//! installation identity, HTTP client, session) lives in one
//! [`ClientContext`], built once and passed by reference. There are no
//! process-wide singletons, so tests can run isolated contexts side by side.

use crate::callbacks::LiveQueryCallbacks;
use crate::cloud::CloudInvoker;
use crate::config::ClientConfig;
use crate::connection::{ConnectOptions, Connection};
use crate::error::{ClientError, ClientResult};
use crate::http::{HttpClient, RestEndpoint};
use crate::live_query::LiveQueryClient;
use crate::object_store::{flush, RestObjectStore};
use crate::registry::TypeRegistry;
use crate::transport::LiveTransport;
use objsync_core::{InstallationService, ObjectState, RemoteObject};
use objsync_protocol::{Codec, JsonCodec, QuerySpec};
use objsync_storage::{InMemoryCache, PersistentCache};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`ClientContext`].
pub struct ClientContextBuilder {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    cache: Option<Arc<dyn PersistentCache>>,
    http: Option<Arc<dyn HttpClient>>,
    session_token: Option<String>,
    registry: TypeRegistry,
}

impl ClientContextBuilder {
    /// Uses `codec` for live query frames. Defaults to [`JsonCodec`].
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Persists the installation id in `cache`. Defaults to an
    /// [`InMemoryCache`].
    pub fn with_cache(mut self, cache: Arc<dyn PersistentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enables REST calls (flush, cloud functions) through `client`.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    /// Sets the initial session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Starts from an already populated registry.
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Validates the configuration and builds the context.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the configuration is
    /// incomplete.
    pub fn build(self) -> ClientResult<ClientContext> {
        self.config.validate()?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()) as Arc<dyn PersistentCache>);

        Ok(ClientContext {
            config: self.config,
            registry: self.registry,
            codec: self.codec,
            installation: InstallationService::new(cache),
            http: self.http,
            session_token: RwLock::new(self.session_token),
        })
    }
}

/// Shared state of one client.
pub struct ClientContext {
    config: ClientConfig,
    registry: TypeRegistry,
    codec: Arc<dyn Codec>,
    installation: InstallationService,
    http: Option<Arc<dyn HttpClient>>,
    session_token: RwLock<Option<String>>,
}

impl ClientContext {
    /// Starts building a context.
    pub fn builder(config: ClientConfig) -> ClientContextBuilder {
        ClientContextBuilder {
            config,
            codec: Arc::new(JsonCodec),
            cache: None,
            http: None,
            session_token: None,
            registry: TypeRegistry::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the installation identity service.
    pub fn installation(&self) -> &InstallationService {
        &self.installation
    }

    /// Returns the current session token.
    pub fn session_token(&self) -> Option<String> {
        self.session_token.read().clone()
    }

    /// Replaces the session token used by new connections and REST calls.
    pub fn set_session_token(&self, token: Option<String>) {
        *self.session_token.write() = token;
    }

    /// Opens a live query connection over `transport`.
    ///
    /// The installation id is loaded (or created) first; if the cache is
    /// unusable an in-memory id is used.
    pub async fn connect(&self, transport: Arc<dyn LiveTransport>) -> ClientResult<Connection> {
        let installation_id = self.installation.get_or_ephemeral().await;

        let mut options = ConnectOptions::new(self.config.clone(), self.codec.clone())
            .with_installation_id(installation_id);
        options.session_token = self.session_token();

        Connection::open(transport, options).await
    }

    /// Creates a subscription for `query` on `connection` and subscribes.
    ///
    /// The decoder for the query's class is resolved before anything is
    /// sent.
    ///
    /// # Errors
    ///
    /// - [`ClientError::UnregisteredType`] or [`ClientError::TypeMismatch`]
    ///   if `T` is not registered for the query's class
    /// - any error of [`LiveQueryClient::subscribe`]
    pub async fn subscribe<T: Send + 'static>(
        &self,
        connection: &Connection,
        query: QuerySpec,
        callbacks: LiveQueryCallbacks<T>,
    ) -> ClientResult<LiveQueryClient<T>> {
        let decoder = self.registry.decoder::<T>(query.class_name())?;
        let client = connection.live_query(query, callbacks, decoder)?;
        client.subscribe().await?;
        Ok(client)
    }

    /// Unsubscribes `client` and waits for the server to confirm.
    pub async fn unsubscribe<T: Send + 'static>(
        &self,
        client: &LiveQueryClient<T>,
    ) -> ClientResult<()> {
        client.unsubscribe().await
    }

    /// Returns a REST endpoint for this application.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if no HTTP client was
    /// configured.
    pub fn rest(&self) -> ClientResult<RestEndpoint> {
        let client = self
            .http
            .clone()
            .ok_or_else(|| ClientError::InvalidConfig("no http client configured".into()))?;
        let rest = RestEndpoint::new(client, self.config.clone());
        Ok(match self.installation.peek() {
            Some(id) => rest.with_installation_id(id),
            None => rest,
        })
    }

    /// Saves the object's pending operations through the REST endpoint.
    pub fn flush(&self, object: &mut RemoteObject) -> ClientResult<ObjectState> {
        let store = RestObjectStore::new(self.rest()?);
        let token = self.session_token();
        debug!(class = %object.class_name(), "flushing object");
        flush(object, &store, token.as_deref())
    }

    /// Returns a cloud function invoker using `connection`'s session token.
    pub fn cloud(&self, connection: &Connection) -> ClientResult<CloudInvoker> {
        Ok(CloudInvoker::new(
            self.rest()?,
            connection.session_token().map(str::to_owned),
        ))
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("application_id", &self.config.application_id)
            .field("registry", &self.registry)
            .field("codec", &self.codec.name())
            .field("rest", &self.http.is_some())
            .finish_non_exhaustive()
    }
}
