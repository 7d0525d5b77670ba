//! Unified error type for storefront operations.
//!
//! Every public operation returns [`Result<T>`]. Front ends show
//! [`Error::user_message`] as a transient notification; the `Display` text
//! is for logs.

use thiserror::Error;

use electrokart_core::{EmailError, ProductId};

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// Storefront error.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Login refused by the server.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration conflicts with an existing account.
    #[error("account already exists: {0}")]
    DuplicateAccount(String),

    /// No session, or the session could not be refreshed.
    #[error("not authenticated")]
    Unauthenticated,

    /// The session lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Product id is not resolvable.
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// Product is already on the wishlist.
    #[error("product {0} is already in the wishlist")]
    AlreadyInWishlist(ProductId),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkout aborted before the order was sent.
    #[error("invalid order data: {0}")]
    InvalidOrderData(String),

    /// The server refused to create the order.
    #[error("order creation failed: {0}")]
    OrderCreationFailed(String),

    /// The server created an order without returning its id.
    #[error("order was created without an order id")]
    OrderCreationIncomplete,

    /// Another checkout is still running.
    #[error("a checkout is already in progress")]
    CheckoutInProgress,

    /// The payment intent could not be created.
    #[error("payment initiation failed: {0}")]
    PaymentInitiationFailed(String),

    /// The server did not confirm the provider's payment.
    #[error("payment confirmation failed: {0}")]
    PaymentConfirmationFailed(String),

    /// The payment widget reported failure or was dismissed.
    #[error("payment cancelled: {0}")]
    PaymentCancelled(String),

    /// 2xx response with `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// HTTP gateway failure.
    #[error(transparent)]
    Gateway(GatewayError),

    /// Durable storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<GatewayError> for Error {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Unauthenticated => Self::Unauthenticated,
            other => Self::Gateway(other),
        }
    }
}

impl From<EmailError> for Error {
    fn from(error: EmailError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl Error {
    /// Text suitable for a transient notification.
    ///
    /// Internal details of server, parse, storage and configuration failures
    /// are not exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::InvalidOrderData(msg) => msg.clone(),
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::DuplicateAccount(_) => "An account with this email already exists".to_string(),
            Self::Unauthenticated => "Please log in to continue".to_string(),
            Self::Forbidden(_) => "You do not have permission to do that".to_string(),
            Self::InvalidProduct(_) => "That product is not available".to_string(),
            Self::AlreadyInWishlist(_) => "Already in your wishlist".to_string(),
            Self::NotFound(what) => format!("{what} was not found"),
            Self::OrderCreationFailed(msg) | Self::Rejected(msg) => msg.clone(),
            Self::OrderCreationIncomplete => {
                "Order was created but could not be paid for. Please contact support".to_string()
            }
            Self::CheckoutInProgress => "Your order is already being placed".to_string(),
            Self::PaymentInitiationFailed(_) => "Could not start the payment".to_string(),
            Self::PaymentConfirmationFailed(_) => {
                "Payment could not be verified. Your cart has been kept".to_string()
            }
            Self::PaymentCancelled(_) => "Payment was cancelled".to_string(),
            Self::Gateway(GatewayError::Network(_)) => {
                "Could not reach the server. Check your connection".to_string()
            }
            Self::Gateway(GatewayError::Client { message, .. }) => message.clone(),
            Self::Gateway(_) => "Something went wrong. Please try again".to_string(),
            Self::Storage(_) | Self::Config(_) => "Internal error".to_string(),
        }
    }

    /// Whether the user has to log in (again) to proceed.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

/// Result type alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
