//! Session-related types.
//!
//! The authenticated identity and the bearer token that goes with it.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use electrokart_core::{Email, Role};

/// Who is logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub email: Email,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// An active session: identity plus access token.
///
/// The refresh token is not part of the session; it lives in the
/// cookie-like store and is only read when refreshing.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    access_token: SecretString,
}

impl Session {
    #[must_use]
    pub const fn new(identity: Identity, access_token: SecretString) -> Self {
        Self {
            identity,
            access_token,
        }
    }

    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Same identity with a new access token.
    #[must_use]
    pub fn with_access_token(&self, access_token: SecretString) -> Self {
        Self {
            identity: self.identity.clone(),
            access_token,
        }
    }
}

/// Flat session record: the login response `data` and the persisted form.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRecord {
    #[serde(alias = "name")]
    pub username: String,
    pub email: Email,
    #[serde(default)]
    pub role: Role,
    #[serde(alias = "token")]
    pub access_token: String,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self::new(
            Identity {
                username: record.username,
                email: record.email,
                role: record.role,
            },
            SecretString::from(record.access_token),
        )
    }
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            username: session.identity.username.clone(),
            email: session.identity.email.clone(),
            role: session.identity.role,
            access_token: session.access_token.expose_secret().to_owned(),
        }
    }
}
