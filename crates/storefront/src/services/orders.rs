//! Order creation and order history.

use tracing::instrument;

use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError};
use crate::models::{CheckoutPayload, CreatedOrder, ListPayload, Order};

use super::aggregate::{ensure_success, require_session};

const ORDER_FAILED: &str = "Could not place your order";

/// Orders client.
#[derive(Clone)]
pub struct OrderService {
    gateway: Gateway,
}

impl OrderService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Orders placed by the logged-in user.
    ///
    /// # Errors
    ///
    /// `Error::Unauthenticated` without a session, otherwise the gateway error.
    #[instrument(skip(self))]
    pub async fn my_orders(&self) -> Result<Vec<Order>> {
        require_session(self.gateway.session())?;
        let envelope = self
            .gateway
            .get::<ListPayload<Order>>("/Orders/my-orders")
            .await?;
        Ok(ensure_success(envelope, "Could not load your orders")?
            .map(ListPayload::into_vec)
            .unwrap_or_default())
    }

    /// Create an order. The server computes and fixes the total.
    ///
    /// # Errors
    ///
    /// - `Error::OrderCreationFailed` with the server's message when it refuses
    /// - `Error::Unauthenticated` / `Error::Gateway` for auth and transport failures
    #[instrument(skip(self, payload), fields(payment_method = %payload.payment_method, items = payload.items.len()))]
    pub async fn place(&self, payload: &CheckoutPayload) -> Result<CreatedOrder> {
        let envelope = match self
            .gateway
            .post::<_, CreatedOrder>("/Orders/checkout", payload)
            .await
        {
            Ok(envelope) => envelope,
            Err(
                GatewayError::Client { message, .. } | GatewayError::Server { message, .. },
            ) => {
                return Err(Error::OrderCreationFailed(order_message(&message)));
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.is_success() {
            return Err(Error::OrderCreationFailed(envelope.message_or(ORDER_FAILED)));
        }
        Ok(envelope.data.unwrap_or_default())
    }
}

fn order_message(server: &str) -> String {
    if server.is_empty() || server == "no details provided" {
        ORDER_FAILED.to_string()
    } else {
        server.to_string()
    }
}
