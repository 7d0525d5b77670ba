//! HTTP gateway: request construction and the authentication-recovery policy.
//!
//! # Policy
//!
//! - Every request carries `Authorization: Bearer <token>` when a session
//!   exists.
//! - A 401 on a non-auth endpoint, from a request that has not been retried,
//!   triggers one token refresh. Concurrent 401s share a single refresh
//!   call; see [`refresh`].
//! - Refresh success: the new token is stored and every waiting request is
//!   retried once with it.
//! - Refresh failure: every waiting request fails with
//!   [`GatewayError::Unauthenticated`], the session is ended and
//!   [`SessionEvent::Expired`](crate::session::SessionEvent::Expired) is
//!   published so the front end can send the user to the login screen.
//! - Any other failure is returned unchanged. There is no other retry.

pub mod refresh;
pub mod transport;

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::models::ApiEnvelope;
use crate::session::SessionStore;
use crate::storage::{Storage, keys};

use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome, Turn};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/Auth/Refresh";

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 401 that refresh could not resolve, or no session to refresh.
    #[error("not authenticated")]
    Unauthenticated,

    /// No response reached us.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// 5xx response.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 4xx response other than 401.
    #[error("request rejected with {status}: {message}")]
    Client { status: u16, message: String },

    /// 2xx response whose body is not the expected JSON.
    #[error("invalid response body: {0}")]
    Parse(#[from] serde_json::Error),
}

impl GatewayError {
    /// HTTP status if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthenticated => Some(401),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::Network(_) | Self::Parse(_) => None,
        }
    }

    /// The server's message for status-derived errors.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Server { message, .. } | Self::Client { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Gateway to the ElectroKart REST API.
///
/// Cheap to clone; all clones share one transport, session store and
/// refresh coordinator.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    transport: Arc<dyn Transport>,
    session: SessionStore,
    cookies: Arc<dyn Storage>,
    refresh: RefreshCoordinator,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    #[serde(alias = "token")]
    access_token: String,
}

impl Gateway {
    /// Create a gateway.
    ///
    /// `cookies` is the cookie-like store the refresh token is read from.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: SessionStore,
        cookies: Arc<dyn Storage>,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                session,
                cookies,
                refresh: RefreshCoordinator::default(),
            }),
        }
    }

    /// The session store whose token this gateway sends.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// Whether a token refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_in_flight()
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// `GET` and decode the envelope.
    ///
    /// # Errors
    ///
    /// See [`Gateway::execute`]; also `GatewayError::Parse` for a malformed body.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiEnvelope<T>, GatewayError> {
        let response = self.execute(Method::GET, path, None).await?;
        decode(&response)
    }

    /// `POST` a JSON body and decode the envelope.
    ///
    /// # Errors
    ///
    /// See [`Gateway::execute`]; also `GatewayError::Parse` for a malformed body.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiEnvelope<T>, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::POST, path, Some(body)).await?;
        decode(&response)
    }

    /// `PUT` a JSON body and decode the envelope.
    ///
    /// # Errors
    ///
    /// See [`Gateway::execute`]; also `GatewayError::Parse` for a malformed body.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiEnvelope<T>, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::PUT, path, Some(body)).await?;
        decode(&response)
    }

    /// `PATCH` a JSON body and decode the envelope.
    ///
    /// # Errors
    ///
    /// See [`Gateway::execute`]; also `GatewayError::Parse` for a malformed body.
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<ApiEnvelope<T>, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::PATCH, path, Some(body)).await?;
        decode(&response)
    }

    /// `DELETE` and decode the envelope.
    ///
    /// # Errors
    ///
    /// See [`Gateway::execute`]; also `GatewayError::Parse` for a malformed body.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiEnvelope<T>, GatewayError> {
        let response = self.execute(Method::DELETE, path, None).await?;
        decode(&response)
    }

    // =========================================================================
    // Policy
    // =========================================================================

    /// Send a request under the authentication-recovery policy.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Unauthenticated` for a 401 that refresh did not resolve
    /// - `GatewayError::Network` when no response was received
    /// - `GatewayError::Server` / `GatewayError::Client` for other non-2xx statuses
    #[instrument(skip(self, body), fields(%method, path))]
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, GatewayError> {
        let sent_with = self.inner.session.access_token();
        let request = HttpRequest {
            method,
            path: path.to_owned(),
            body,
            bearer: sent_with.clone(),
        };

        let response = self.inner.transport.send(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED || !recovers_auth(path) {
            return classify(response);
        }

        let Some(sent_with) = sent_with else {
            debug!("401 without a session, nothing to refresh");
            return Err(GatewayError::Unauthenticated);
        };

        let token = self.recover(&sent_with).await?;
        debug!("Retrying request with refreshed token");
        let retry = HttpRequest {
            bearer: Some(token.clone()),
            ..request
        };
        // One retry only; a 401 with the refreshed token ends the session
        let response = self.inner.transport.send(retry).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            let still_current = self
                .inner
                .session
                .access_token()
                .is_some_and(|current| current.expose_secret() == token.expose_secret());
            if still_current {
                warn!("Request rejected after token refresh, ending session");
                self.inner.session.expire();
            }
            return Err(GatewayError::Unauthenticated);
        }
        classify(response)
    }

    /// Get a token newer than `sent_with`, refreshing if nobody has yet.
    async fn recover(&self, sent_with: &SecretString) -> Result<SecretString, GatewayError> {
        let guard = match self.inner.refresh.join() {
            Turn::Follower(rx) => {
                debug!("Token refresh in flight, waiting for it");
                return match rx.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(_)) | Err(_) => Err(GatewayError::Unauthenticated),
                };
            }
            Turn::Leader(guard) => guard,
        };

        // Checked while leading: a refresh that settled before the join is reused
        let outcome = match self.inner.session.access_token() {
            None => Err(RefreshFailure("no session".to_string())),
            Some(current) if current.expose_secret() != sent_with.expose_secret() => {
                debug!("Token already refreshed, reusing it");
                Ok(current)
            }
            Some(_) => {
                let outcome = self.refresh_token().await;
                match &outcome {
                    Ok(token) => self.inner.session.replace_token(token.clone()),
                    Err(failure) => {
                        warn!(error = %failure, "Token refresh failed, ending session");
                        self.inner.session.expire();
                    }
                }
                outcome
            }
        };
        let released = guard.finish(&outcome);
        debug!(released, "Token refresh settled");
        outcome.map_err(|_| GatewayError::Unauthenticated)
    }

    /// Call the refresh endpoint once.
    #[instrument(skip(self))]
    async fn refresh_token(&self) -> RefreshOutcome {
        let access = self
            .inner
            .session
            .access_token()
            .ok_or_else(|| RefreshFailure("no session".to_string()))?;
        let refresh = self
            .inner
            .cookies
            .get(keys::REFRESH_TOKEN_COOKIE)
            .map_err(|e| RefreshFailure(e.to_string()))?
            .ok_or_else(|| RefreshFailure("no refresh token".to_string()))?;

        let body = serde_json::to_value(RefreshRequest {
            access_token: access.expose_secret(),
            refresh_token: &refresh,
        })
        .map_err(|e| RefreshFailure(e.to_string()))?;

        let response = self
            .inner
            .transport
            .send(HttpRequest {
                method: Method::POST,
                path: REFRESH_PATH.to_owned(),
                body: Some(body),
                bearer: Some(access),
            })
            .await
            .map_err(|e| RefreshFailure(e.to_string()))?;

        if !response.status.is_success() {
            return Err(RefreshFailure(format!(
                "HTTP {}: {}",
                response.status,
                extract_message(&response.body)
            )));
        }

        let envelope: ApiEnvelope<RefreshData> =
            decode(&response).map_err(|e| RefreshFailure(e.to_string()))?;
        if !envelope.is_success() {
            return Err(RefreshFailure(envelope.message_or("refresh rejected")));
        }
        envelope
            .data
            .map(|data| SecretString::from(data.access_token))
            .ok_or_else(|| RefreshFailure("response carried no token".to_string()))
    }
}

/// Auth endpoints answer 401 for bad credentials; refreshing cannot help them.
fn recovers_auth(path: &str) -> bool {
    let path = path.trim_start_matches('/');
    !path
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("auth/"))
}

fn classify(response: HttpResponse) -> Result<HttpResponse, GatewayError> {
    let status = response.status;
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(GatewayError::Unauthenticated);
    }

    let message = extract_message(&response.body);
    if status.is_server_error() {
        tracing::error!(%status, %message, "API returned server error");
        Err(GatewayError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(GatewayError::Client {
            status: status.as_u16(),
            message,
        })
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<ApiEnvelope<T>, GatewayError> {
    if response.body.trim().is_empty() {
        return Ok(ApiEnvelope::empty());
    }
    serde_json::from_str(&response.body).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %response.body.chars().take(500).collect::<String>(),
            "Failed to parse API response"
        );
        GatewayError::Parse(e)
    })
}

/// Pull a human-readable message out of an error body.
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "title", "error"] {
            if let Some(message) = value.get(field).and_then(serde_json::Value::as_str)
                && !message.trim().is_empty()
            {
                return message.trim().to_owned();
            }
        }
    }
    let text = body.trim();
    if text.is_empty() {
        "no details provided".to_owned()
    } else {
        text.chars().take(200).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::Role;

    use super::*;
    use crate::models::{CartLine, ListPayload};
    use crate::session::SessionEvent;
    use crate::testing::FakeBackend;

    #[test]
    fn test_auth_paths_skip_recovery() {
        assert!(!recovers_auth("/Auth/Login"));
        assert!(!recovers_auth("/auth/refresh"));
        assert!(!recovers_auth(REFRESH_PATH));
        assert!(recovers_auth("/Cart"));
        assert!(recovers_auth("/Authors"));
        assert!(recovers_auth("/"));
    }

    #[test]
    fn test_extract_message_prefers_json_fields() {
        assert_eq!(
            extract_message(r#"{"success":false,"message":"Out of stock"}"#),
            "Out of stock"
        );
        assert_eq!(
            extract_message(r#"{"title":"One or more validation errors occurred."}"#),
            "One or more validation errors occurred."
        );
        assert_eq!(extract_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_message(""), "no details provided");
    }

    #[test]
    fn test_classify_statuses() {
        let ok = classify(HttpResponse::new(StatusCode::NO_CONTENT, ""));
        assert!(ok.is_ok());

        let err = classify(HttpResponse::new(StatusCode::UNAUTHORIZED, "")).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));

        let err = classify(HttpResponse::new(
            StatusCode::CONFLICT,
            r#"{"message":"exists"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Client { status: 409, .. }));
        assert_eq!(err.server_message(), Some("exists"));

        let err = classify(HttpResponse::new(StatusCode::BAD_GATEWAY, "")).unwrap_err();
        assert!(matches!(err, GatewayError::Server { status: 502, .. }));
    }

    #[test]
    fn test_decode_empty_body() {
        let envelope: ApiEnvelope<serde_json::Value> =
            decode(&HttpResponse::new(StatusCode::OK, "  ")).unwrap();
        assert!(envelope.is_success());
        assert!(envelope.data.is_none());
    }

    async fn fetch_cart(gateway: &Gateway) -> Result<Vec<CartLine>, GatewayError> {
        let envelope = gateway.get::<ListPayload<CartLine>>("/Cart").await?;
        Ok(envelope.data.map(ListPayload::into_vec).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_requests_carry_session_token() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);

        fetch_cart(&gateway).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let backend = FakeBackend::with_catalog();
        let (gateway, session) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        backend.shop().expire_access_tokens();

        let (first, second, third) = tokio::join!(
            fetch_cart(&gateway),
            fetch_cart(&gateway),
            gateway.get::<serde_json::Value>("/Wishlist"),
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(third.is_ok());
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 1);
        assert_eq!(backend.count(Method::GET, "/Cart"), 4);
        assert_eq!(backend.count(Method::GET, "/Wishlist"), 2);

        let token = session.access_token().unwrap();
        assert_eq!(token.expose_secret(), "tok2");
        assert!(!gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_fails_every_waiter() {
        let backend = FakeBackend::with_catalog();
        let (gateway, session) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let mut events = session.subscribe();
        backend.shop().expire_access_tokens();
        backend.shop().faults().refresh_fails = true;

        let (first, second) = tokio::join!(fetch_cart(&gateway), fetch_cart(&gateway));

        assert!(matches!(first, Err(GatewayError::Unauthenticated)));
        assert!(matches!(second, Err(GatewayError::Unauthenticated)));
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 1);
        assert!(!session.is_authenticated());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_stale_token_retries_without_refresh() {
        let backend = FakeBackend::with_catalog();
        let (gateway, session) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let stale = session.access_token().unwrap();
        backend.shop().expire_access_tokens();

        fetch_cart(&gateway).await.unwrap();
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 1);

        // A request that went out with the old token finds a newer one stored
        let token = gateway.recover(&stale).await.unwrap();
        assert_eq!(token.expose_secret(), "tok2");
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn test_reused_token_leaves_refresh_available() {
        let backend = FakeBackend::with_catalog();
        let (gateway, session) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let stale = session.access_token().unwrap();
        backend.shop().expire_access_tokens();
        fetch_cart(&gateway).await.unwrap();

        // Leads the coordinator, finds tok2 already stored and settles with it
        gateway.recover(&stale).await.unwrap();
        backend.shop().expire_access_tokens();
        fetch_cart(&gateway).await.unwrap();

        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 2);
        assert_eq!(session.access_token().unwrap().expose_secret(), "tok3");
    }

    #[tokio::test]
    async fn test_401_after_refresh_ends_session() {
        let backend = FakeBackend::with_catalog();
        let (gateway, session) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let mut events = session.subscribe();
        backend.fail_next("/Cart", 401);
        backend.fail_next("/Cart", 401);

        let err = fetch_cart(&gateway).await.unwrap_err();

        assert!(matches!(err, GatewayError::Unauthenticated));
        assert_eq!(backend.count(Method::GET, "/Cart"), 2);
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 1);
        assert!(!session.is_authenticated());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::TokenRefreshed);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_401_without_session_is_not_refreshed() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();

        let err = fetch_cart(&gateway).await.unwrap_err();

        assert!(matches!(err, GatewayError::Unauthenticated));
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 0);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_endpoint_401_is_returned_as_is() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);

        let err = gateway
            .post::<_, serde_json::Value>(
                "/Auth/Login",
                &serde_json::json!({ "email": "a@b.com", "password": "wrong" }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Unauthenticated));
        assert_eq!(backend.count(Method::POST, REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_server_errors_are_not_retried() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        backend.fail_next("/Cart", 503);

        let err = fetch_cart(&gateway).await.unwrap_err();

        assert!(matches!(err, GatewayError::Server { status: 503, .. }));
        assert_eq!(backend.count(Method::GET, "/Cart"), 1);
    }
}
