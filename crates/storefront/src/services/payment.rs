//! Online payment: server-side intent and confirmation, plus the contract
//! for the provider's hosted payment widget.
//!
//! The widget is external. [`PaymentWidget`] is the seam: front ends
//! implement it (the CLI reads provider ids from the terminal, tests script
//! the outcome).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use electrokart_core::{Currency, OrderId, Price};

use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError};

use super::aggregate::ensure_success;

/// Payment widget configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetOptions {
    /// Public key id of the merchant account.
    pub key: String,
    /// Amount in minor units (paise).
    pub amount: i64,
    pub currency: Currency,
    /// Provider order id returned by the initiate call.
    pub order_id: String,
    /// Store name shown in the widget header.
    pub name: String,
    pub description: String,
    pub prefill: Prefill,
    pub theme: Theme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prefill {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub color: String,
}

/// Identifiers issued by the provider when the shopper pays.
///
/// Forwarded verbatim to the confirm endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayment {
    pub payment_id: String,
    pub order_id: String,
    pub signature: String,
}

/// How the widget session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetOutcome {
    /// The success handler fired.
    Completed(ProviderPayment),
    /// The shopper dismissed the widget or the provider reported failure.
    Failed { reason: String },
}

/// The provider's payment widget.
#[async_trait]
pub trait PaymentWidget: Send + Sync {
    /// Show the widget and wait for it to resolve.
    async fn open(&self, options: WidgetOptions) -> WidgetOutcome;
}

/// One payment for one order. Lives only for the duration of a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub order_id: OrderId,
    pub amount: Price,
    /// Set once the intent is created.
    pub provider_order_id: Option<String>,
}

/// Server response to `POST /Payments/initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    #[serde(alias = "razorpayOrderId", alias = "orderId")]
    pub provider_order_id: String,
    /// Merchant key if the server hands it out.
    #[serde(default, alias = "keyId")]
    pub key: Option<String>,
    /// Minor units, when the server echoes the amount.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    order_id: OrderId,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    payment_id: &'a str,
    order_id: OrderId,
    provider_order_id: &'a str,
    signature: &'a str,
}

/// Payments client.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Gateway,
}

impl PaymentService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Create a payment intent for `attempt`.
    ///
    /// # Errors
    ///
    /// `Error::PaymentInitiationFailed` for any refusal; `Error::Unauthenticated`
    /// if the session is gone.
    #[instrument(skip(self), fields(order_id = %attempt.order_id, amount = %attempt.amount))]
    pub async fn initiate(
        &self,
        attempt: &PaymentAttempt,
        description: &str,
    ) -> Result<PaymentIntent> {
        let request = InitiateRequest {
            order_id: attempt.order_id,
            amount: attempt.amount.amount,
            currency: attempt.amount.currency.code(),
            description,
        };
        let envelope = self
            .gateway
            .post::<_, PaymentIntent>("/Payments/initiate", &request)
            .await
            .map_err(|e| payment_error(e, Error::PaymentInitiationFailed))?;

        ensure_success(envelope, "Payment initiation was refused")
            .map_err(|e| Error::PaymentInitiationFailed(e.user_message()))?
            .ok_or_else(|| {
                Error::PaymentInitiationFailed("response carried no provider order".to_string())
            })
    }

    /// Ask the server to verify the provider's payment.
    ///
    /// # Errors
    ///
    /// `Error::PaymentConfirmationFailed` for any refusal; `Error::Unauthenticated`
    /// if the session is gone.
    #[instrument(skip(self, payment), fields(order_id = %order_id, payment_id = %payment.payment_id))]
    pub async fn confirm(&self, order_id: OrderId, payment: &ProviderPayment) -> Result<()> {
        let request = ConfirmRequest {
            payment_id: &payment.payment_id,
            order_id,
            provider_order_id: &payment.order_id,
            signature: &payment.signature,
        };
        let envelope = self
            .gateway
            .post::<_, serde_json::Value>("/Payments/confirm", &request)
            .await
            .map_err(|e| payment_error(e, Error::PaymentConfirmationFailed))?;

        ensure_success(envelope, "Payment verification failed")
            .map_err(|e| Error::PaymentConfirmationFailed(e.user_message()))?;
        Ok(())
    }
}

fn payment_error(error: GatewayError, wrap: fn(String) -> Error) -> Error {
    match error {
        GatewayError::Unauthenticated => Error::Unauthenticated,
        GatewayError::Client { message, .. } | GatewayError::Server { message, .. } => {
            wrap(message)
        }
        other => wrap(other.to_string()),
    }
}
