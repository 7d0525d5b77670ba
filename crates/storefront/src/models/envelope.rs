//! Response envelope shared by every endpoint.

use serde::Deserialize;

/// `{ success, message, data }` wrapper returned by the backend.
///
/// Every field is optional: `DELETE` endpoints often return an empty body,
/// and catalog reads may omit `success`. A missing `success` is treated as
/// success because the HTTP status has already been checked.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Envelope for an empty 2xx body.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            success: None,
            message: None,
            data: None,
        }
    }

    /// Whether the server reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(true)
    }

    /// The server message, or `fallback` when none was given.
    #[must_use]
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_owned()
    }
}

/// Collection payloads arrive either as a bare array or as `{ items: [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged, bound(deserialize = "T: Deserialize<'de>"))]
pub enum ListPayload<T> {
    Bare(Vec<T>),
    Wrapped { items: Vec<T> },
}

impl<T> ListPayload<T> {
    /// The items regardless of shape.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}
