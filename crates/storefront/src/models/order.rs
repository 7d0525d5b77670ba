//! Orders and the checkout payload.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use electrokart_core::{OrderId, OrderStatus, PaymentMethod, Price, ProductId};

/// A line of a placed order, priced at the time of ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
    pub quantity: u32,
    #[serde(alias = "price")]
    pub unit_price: Decimal,
}

/// A persisted order. Only the server changes its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(alias = "id")]
    pub order_id: OrderId,
    #[serde(default, alias = "orderItems")]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    /// Fixed by the server when the order is created.
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(alias = "orderDate")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Total for display: the server total, or the sum of the lines when the
    /// server left it out.
    #[must_use]
    pub fn display_total(&self) -> Price {
        let amount = self.total_amount.unwrap_or_else(|| {
            self.items
                .iter()
                .map(|item| item.unit_price * Decimal::from(item.quantity))
                .sum()
        });
        Price::store(amount)
    }
}

/// One entry of the checkout item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Body of `POST /Orders/checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub items: Vec<CheckoutItem>,
}

/// `data` of a successful checkout response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    #[serde(default, alias = "id")]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
}
