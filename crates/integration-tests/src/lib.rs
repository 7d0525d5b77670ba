//! End-to-end harness for the ElectroKart storefront client.
//!
//! [`MockServer`] serves a [`MockShop`] over real HTTP on `127.0.0.1:0`, under
//! the `/api` prefix the production backend uses. The refresh token travels
//! in a `Set-Cookie: refreshToken=...` header exactly as in production, so
//! tests exercise the `reqwest` transport, cookie capture and the file store.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p electrokart-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use url::Url;

use electrokart_storefront::testing::{MockShop, ScriptedWidget};
use electrokart_storefront::{ClientConfig, Storefront};

pub use electrokart_storefront::testing;

/// Prefix every API route lives under.
pub const API_PREFIX: &str = "/api";

#[derive(Clone, Default)]
struct ServerState {
    shop: Arc<Mutex<MockShop>>,
    log: Arc<Mutex<Vec<(Method, String)>>>,
}

/// A running mock backend. The server stops when this is dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: ServerState,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start a server over [`MockShop::with_catalog`].
    ///
    /// # Errors
    ///
    /// Returns an error if no local port can be bound.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockShop::with_catalog()).await
    }

    /// Start a server over `shop`.
    ///
    /// # Errors
    ///
    /// Returns an error if no local port can be bound.
    pub async fn start_with(shop: MockShop) -> std::io::Result<Self> {
        init_tracing();

        let state = ServerState {
            shop: Arc::new(Mutex::new(shop)),
            log: Arc::default(),
        };
        let app = Router::new()
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock server stopped");
            }
        });
        tracing::debug!(%addr, "Mock server listening");

        Ok(Self { addr, state, task })
    }

    /// Base URL of the API, including the `/api` prefix.
    ///
    /// # Panics
    ///
    /// Never in practice: the address is a bound local socket.
    #[must_use]
    pub fn api_url(&self) -> Url {
        let raw = format!("http://{}{API_PREFIX}", self.addr);
        match Url::parse(&raw) {
            Ok(url) => url,
            Err(e) => panic!("mock server produced an invalid URL {raw}: {e}"),
        }
    }

    /// Lock the shop.
    pub fn shop(&self) -> MutexGuard<'_, MockShop> {
        self.state.shop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests the server received with this method and path
    /// (path relative to the API prefix).
    #[must_use]
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.state
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(m, p)| m == method && p.eq_ignore_ascii_case(path))
            .count()
    }

    /// Client configuration pointing at this server, with durable state in
    /// a fresh temporary directory.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.api_url(), fresh_state_dir())
    }

    /// Connect a storefront over real HTTP and file storage in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory or HTTP client cannot be
    /// created.
    pub fn storefront(
        &self,
        config: &ClientConfig,
        widget: ScriptedWidget,
    ) -> electrokart_storefront::Result<Storefront> {
        Storefront::connect(config, Arc::new(widget))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A unique, not yet existing directory under the system temp dir.
#[must_use]
pub fn fresh_state_dir() -> PathBuf {
    std::env::temp_dir().join(format!("electrokart-it-{}", uuid::Uuid::new_v4()))
}

async fn dispatch(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(path) = uri.path().strip_prefix(API_PREFIX) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state
        .log
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((method.clone(), path.to_string()));

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let json = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(json) => Some(json),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response();
            }
        }
    };

    let reply = state
        .shop
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .handle(&method, path, bearer, json.as_ref());

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match reply.body {
        Some(body) => (status, axum::Json(body)).into_response(),
        None => status.into_response(),
    };
    if let Some(cookie) = reply.set_cookie {
        let value = if cookie.is_empty() {
            "refreshToken=; Path=/; Max-Age=0; HttpOnly".to_string()
        } else {
            format!("refreshToken={cookie}; Path=/; HttpOnly; SameSite=Strict")
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "electrokart_storefront=debug,tower_http=warn".into()),
        )
        .with_test_writer()
        .try_init();
}
