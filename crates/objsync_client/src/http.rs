//! REST access.
//!
//! The HTTP library is abstracted behind [`HttpClient`] so any client (or
//! an in-process loopback server) can carry requests. [`RestEndpoint`] adds
//! the application headers and turns server error bodies into
//! [`ClientError::Server`].

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use objsync_protocol::ProtocolError;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Header carrying the application id.
pub const APPLICATION_ID_HEADER: &str = "X-Parse-Application-Id";
/// Header carrying the user session token.
pub const SESSION_TOKEN_HEADER: &str = "X-Parse-Session-Token";
/// Header carrying the installation id.
pub const INSTALLATION_ID_HEADER: &str = "X-Parse-Installation-Id";
/// Header carrying the client key.
pub const CLIENT_KEY_HEADER: &str = "X-Parse-Client-Key";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Returns the first value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the URL path, without scheme, host or query.
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        let path = without_scheme
            .find('/')
            .map_or("/", |i| &without_scheme[i..]);
        path.split('?').next().unwrap_or(path)
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a request. `Err` means no response was received.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// JSON requests against the REST endpoint of one application.
#[derive(Clone)]
pub struct RestEndpoint {
    client: Arc<dyn HttpClient>,
    config: ClientConfig,
    installation_id: Option<Uuid>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl RestEndpoint {
    /// Creates an endpoint.
    pub fn new(client: Arc<dyn HttpClient>, config: ClientConfig) -> Self {
        Self {
            client,
            config,
            installation_id: None,
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Sends the installation id header with every request.
    pub fn with_installation_id(mut self, id: Uuid) -> Self {
        self.installation_id = Some(id);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.server_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Builds the headers sent with every request.
    pub fn headers(&self, session_token: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                APPLICATION_ID_HEADER.to_string(),
                self.config.application_id.clone(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = session_token {
            headers.push((SESSION_TOKEN_HEADER.to_string(), token.to_string()));
        }
        if let Some(id) = self.installation_id {
            headers.push((INSTALLATION_ID_HEADER.to_string(), id.to_string()));
        }
        if let Some(key) = &self.config.client_key {
            headers.push((CLIENT_KEY_HEADER.to_string(), key.clone()));
        }
        headers
    }

    /// Sends a JSON request to `path` (relative to the base URL) and returns
    /// the decoded response body.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if no response was received
    /// - [`ClientError::Server`] for non-2xx responses
    /// - [`ClientError::Protocol`] if a body is not valid JSON
    pub fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        session_token: Option<&str>,
    ) -> ClientResult<Value> {
        if !self.client.is_healthy() {
            return Err(ClientError::NotConnected);
        }

        let url = format!(
            "{}/{}",
            self.config.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(ProtocolError::from)?;
        let request = HttpRequest {
            method,
            url,
            headers: self.headers(session_token),
            body,
        };
        debug!(%method, url = %request.url, "sending request");

        let response = match self.client.send(request) {
            Ok(response) => response,
            Err(message) => {
                warn!(error = %message, "request failed");
                *self.last_error.write() = Some(message.clone());
                return Err(ClientError::transport_retryable(message));
            }
        };

        let value = parse_body(&response.body)?;
        if response.is_success() {
            *self.last_error.write() = None;
            return Ok(value);
        }

        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| i64::from(response.status));
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        *self.last_error.write() = Some(message.clone());
        Err(ClientError::Server { code, message })
    }
}

impl fmt::Debug for RestEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestEndpoint")
            .field("base_url", &self.config.server_url)
            .field("installation_id", &self.installation_id)
            .finish_non_exhaustive()
    }
}

fn parse_body(body: &[u8]) -> ClientResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body).map_err(ProtocolError::from)?)
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request and returns the response.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        Ok(self.server.handle(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for TestClient {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "no response set".to_string())
        }
    }

    fn endpoint(client: Arc<TestClient>) -> RestEndpoint {
        let config = ClientConfig::new("app", "https://example.com/server/").with_client_key("ck");
        RestEndpoint::new(client, config)
    }

    #[test]
    fn sends_headers_and_body() {
        let client = Arc::new(TestClient::default());
        *client.response.lock() = Some(HttpResponse::json(200, &json!({"ok": true})));
        let id = Uuid::new_v4();

        let value = endpoint(client.clone())
            .with_installation_id(id)
            .request(HttpMethod::Post, "/functions/hello", Some(&json!({"a": 1})), Some("r:t"))
            .unwrap();
        assert_eq!(value, json!({"ok": true}));

        let request = client.requests.lock()[0].clone();
        assert_eq!(request.url, "https://example.com/server/functions/hello");
        assert_eq!(request.path(), "/server/functions/hello");
        assert_eq!(request.header("x-parse-application-id"), Some("app"));
        assert_eq!(request.header(SESSION_TOKEN_HEADER), Some("r:t"));
        assert_eq!(request.header(CLIENT_KEY_HEADER), Some("ck"));
        assert_eq!(request.header(INSTALLATION_ID_HEADER), Some(id.to_string().as_str()));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body.unwrap(), br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn server_error_body() {
        let client = Arc::new(TestClient::default());
        *client.response.lock() = Some(HttpResponse::json(
            400,
            &json!({"code": 141, "error": "bad params"}),
        ));
        let rest = endpoint(client);

        let err = rest.request(HttpMethod::Get, "x", None, None).unwrap_err();
        assert!(matches!(err, ClientError::Server { code: 141, ref message } if message == "bad params"));
        assert_eq!(rest.last_error().as_deref(), Some("bad params"));
    }

    #[test]
    fn status_used_when_body_has_no_code() {
        let client = Arc::new(TestClient::default());
        *client.response.lock() = Some(HttpResponse {
            status: 502,
            body: Vec::new(),
        });

        let err = endpoint(client)
            .request(HttpMethod::Get, "x", None, None)
            .unwrap_err();
        assert!(matches!(err, ClientError::Server { code: 502, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_failure_is_retryable() {
        let client = Arc::new(TestClient::default());
        let err = endpoint(client)
            .request(HttpMethod::Get, "x", None, None)
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport { retryable: true, .. }));
    }

    #[test]
    fn request_path_parsing() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost:1337/classes/Item?where=1".into(),
            headers: Vec::new(),
            body: None,
        };
        assert_eq!(request.path(), "/classes/Item");
    }
}
