//! Login, registration and logout against the `/Auth` endpoints.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, instrument, warn};

use electrokart_core::Email;

use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError};
use crate::models::Identity;
use crate::models::Session;
use crate::models::session::SessionRecord;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Authentication service.
///
/// Establishes and tears down the session held by the gateway's
/// [`SessionStore`](super::SessionStore).
#[derive(Clone)]
pub struct AuthService {
    gateway: Gateway,
}

impl AuthService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Log in and persist the resulting session.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for a malformed email or empty password
    /// - `Error::InvalidCredentials` when the server refuses the login
    /// - `Error::Gateway` on transport or server failure
    /// - `Error::Storage` if the session cannot be persisted
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<Identity> {
        let email = Email::parse(email)?;
        if password.expose_secret().is_empty() {
            return Err(Error::Validation("Password is required".to_string()));
        }

        let request = LoginRequest {
            email: email.as_str(),
            password: password.expose_secret(),
        };
        let envelope = match self.gateway.post::<_, SessionRecord>("/Auth/Login", &request).await {
            Ok(envelope) => envelope,
            Err(GatewayError::Unauthenticated) => return Err(Error::InvalidCredentials),
            Err(GatewayError::Client { status, .. }) if matches!(status, 400 | 404) => {
                return Err(Error::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.is_success() {
            return Err(Error::InvalidCredentials);
        }
        let record = envelope
            .data
            .ok_or_else(|| Error::Rejected("Login response carried no session".to_string()))?;

        let session = Session::from(record);
        let identity = session.identity.clone();
        self.gateway.session().establish(session)?;
        Ok(identity)
    }

    /// Create an account. Does not log in.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for a missing field or a short password
    /// - `Error::DuplicateAccount` when the server reports a conflict
    /// - `Error::Rejected` when the server refuses for another reason
    /// - `Error::Gateway` on transport or server failure
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::Validation("Username is required".to_string()));
        }
        let email = Email::parse(email)?;
        validate_password(password.expose_secret())?;

        let request = RegisterRequest {
            username,
            email: email.as_str(),
            password: password.expose_secret(),
        };
        let envelope = match self
            .gateway
            .post::<_, serde_json::Value>("/Auth/Register", &request)
            .await
        {
            Ok(envelope) => envelope,
            Err(GatewayError::Client {
                status: 409,
                message,
            }) => return Err(Error::DuplicateAccount(message)),
            Err(e) => return Err(e.into()),
        };

        if !envelope.is_success() {
            let message = envelope.message_or("Registration failed");
            if message.to_ascii_lowercase().contains("exist") {
                return Err(Error::DuplicateAccount(message));
            }
            return Err(Error::Rejected(message));
        }

        info!(%email, "Account registered");
        Ok(())
    }

    /// End the session.
    ///
    /// The server call is best-effort: its failure is logged and local
    /// teardown happens regardless.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if self.gateway.session().is_authenticated()
            && let Err(e) = self
                .gateway
                .post::<_, serde_json::Value>("/Auth/Logout", &serde_json::json!({}))
                .await
        {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }
        self.gateway.session().sign_out();
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::Role;
    use reqwest::Method;

    use super::*;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn test_login_establishes_session() {
        let backend = FakeBackend::new();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway.clone());

        let identity = auth
            .login("a@b.com", &SecretString::from("secret1"))
            .await
            .unwrap();

        assert_eq!(identity.username, "A");
        assert_eq!(identity.role, Role::Customer);
        assert!(gateway.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let backend = FakeBackend::new();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway.clone());

        let err = auth
            .login("a@b.com", &SecretString::from("nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidCredentials));
        assert!(!gateway.session().is_authenticated());
        // A 401 from the login endpoint never triggers a refresh
        assert_eq!(backend.count(Method::POST, "/Auth/Refresh"), 0);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_email_without_network() {
        let backend = FakeBackend::new();
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway);

        let err = auth
            .login("not-an-email", &SecretString::from("secret1"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_register_short_password() {
        let backend = FakeBackend::new();
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway);

        let err = auth
            .register("A", "a@b.com", &SecretString::from("12345"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_register_does_not_log_in() {
        let backend = FakeBackend::new();
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway.clone());

        auth.register("A", "a@b.com", &SecretString::from("secret1"))
            .await
            .unwrap();

        assert!(!gateway.session().is_authenticated());
        assert_eq!(backend.count(Method::POST, "/Auth/Register"), 1);
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let backend = FakeBackend::new();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);
        let (gateway, _) = backend.gateway();
        let auth = AuthService::new(gateway);

        let err = auth
            .register("B", "a@b.com", &SecretString::from("secret2"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateAccount(_)));
    }

    #[tokio::test]
    async fn test_logout_survives_server_failure() {
        let backend = FakeBackend::new();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        backend.fail_next("/Auth/Logout", 500);
        let auth = AuthService::new(gateway.clone());

        auth.logout().await;

        assert!(!gateway.session().is_authenticated());
        assert_eq!(backend.count(Method::POST, "/Auth/Logout"), 1);
    }
}
