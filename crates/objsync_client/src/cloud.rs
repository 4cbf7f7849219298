//! Cloud function calls.

use crate::error::{ClientError, ClientResult};
use crate::http::{HttpMethod, RestEndpoint};
use objsync_protocol::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Invokes named server functions with the session of a connection.
#[derive(Debug, Clone)]
pub struct CloudInvoker {
    rest: RestEndpoint,
    session_token: Option<String>,
}

impl CloudInvoker {
    /// Creates an invoker that authenticates with `session_token`.
    pub fn new(rest: RestEndpoint, session_token: Option<String>) -> Self {
        Self {
            rest,
            session_token,
        }
    }

    /// Returns the session token sent with each call.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Calls `functions/{name}` with `params` and decodes its `result`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidConfig`] for an empty function name
    /// - [`ClientError::Server`] if the function fails on the server
    /// - [`ClientError::Protocol`] if the response has no decodable `result`
    pub fn call<P, R>(&self, name: &str, params: &P) -> ClientResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if name.trim().is_empty() {
            return Err(ClientError::InvalidConfig("function name is empty".into()));
        }

        let params = serde_json::to_value(params).map_err(ProtocolError::from)?;
        debug!(function = name, "calling cloud function");
        let mut response = self.rest.request(
            HttpMethod::Post,
            &format!("functions/{name}"),
            Some(&params),
            self.session_token.as_deref(),
        )?;

        let result = response
            .get_mut("result")
            .map(serde_json::Value::take)
            .ok_or(ProtocolError::MissingField("result"))?;
        Ok(serde_json::from_value(result).map_err(ProtocolError::from)?)
    }
}
