//! The HTTP seam under the gateway.
//!
//! [`Transport`] moves one request and returns the raw status and body.
//! It knows nothing about sessions or retries; that policy lives in
//! [`Gateway`](super::Gateway).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::storage::{Storage, keys};

/// Name of the cookie the backend uses for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Failure before any HTTP response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection, DNS, TLS or body errors.
    #[error("request failed: {0}")]
    Failed(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The path could not be joined onto the base URL.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

/// An outbound API request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/Cart/remove/7`.
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<SecretString>,
}

/// Raw response: status plus body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return whatever status the server answered with.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` only when no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
///
/// Captures the refresh-token cookie from every response into the
/// cookie-like store, so the server stays the only writer of that value.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
    cookies: Arc<dyn Storage>,
}

impl ReqwestTransport {
    /// Create a transport for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Failed` if the HTTP client cannot be built.
    pub fn new(
        base_url: &Url,
        timeout: Duration,
        cookies: Arc<dyn Storage>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        // Url::join replaces the last segment unless the base ends with '/'
        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            cookies,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }

    fn capture_refresh_cookie(&self, response: &reqwest::Response) {
        for cookie in response.cookies() {
            if cookie.name() != REFRESH_COOKIE_NAME {
                continue;
            }
            let result = if cookie.value().is_empty() {
                self.cookies.remove(keys::REFRESH_TOKEN_COOKIE)
            } else {
                self.cookies.set(keys::REFRESH_TOKEN_COOKIE, cookie.value())
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to persist refresh token cookie");
            }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        debug!(method = %request.method, %url, "Sending request");

        let mut builder = self.client.request(request.method, url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        self.capture_refresh_cookie(&response);

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn transport(base: &str) -> ReqwestTransport {
        ReqwestTransport::new(
            &Url::parse(base).unwrap(),
            Duration::from_secs(5),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_url_join_keeps_base_path() {
        let transport = transport("http://localhost:5000/api");
        assert_eq!(
            transport.url_for("/Cart/remove/7").unwrap().as_str(),
            "http://localhost:5000/api/Cart/remove/7"
        );
    }

    #[test]
    fn test_url_join_at_root() {
        let transport = transport("http://localhost:3000");
        assert_eq!(
            transport.url_for("/Products").unwrap().as_str(),
            "http://localhost:3000/Products"
        );
    }
}
