//! Cart lines and the cart snapshot published to views.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use electrokart_core::{CartLineId, Price, ProductId};

use super::ProductRef;

/// One line of the server-side cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(rename = "itemId", alias = "cartItemId")]
    pub id: CartLineId,
    #[serde(flatten)]
    pub product: ProductRef,
    /// Always at least 1; a line updated below 1 is removed instead.
    pub quantity: u32,
}

impl CartLine {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// The cart as last confirmed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    /// Sum of quantities across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    /// Sum of line totals. Only used as a display and payment fallback;
    /// the server total is authoritative.
    #[must_use]
    pub fn grand_total(&self) -> Price {
        Price::store(self.lines.iter().map(CartLine::line_total).sum())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn line(&self, id: CartLineId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.id == id)
    }

    #[must_use]
    pub fn contains_product(&self, product_id: ProductId) -> bool {
        self.lines.iter().any(|line| line.product.id == product_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn line(id: i32, product: i32, price: &str, quantity: u32) -> CartLine {
        CartLine {
            id: CartLineId::new(id),
            product: ProductRef {
                id: ProductId::new(product),
                name: format!("Product {product}"),
                price: Decimal::from_str(price).unwrap(),
                image_url: None,
            },
            quantity,
        }
    }

    #[test]
    fn test_deserialize_backend_line() {
        let json = r#"{
            "itemId": 7,
            "productId": 42,
            "productName": "Phone",
            "price": 14999.5,
            "imageUrl": "/img/phone.png",
            "quantity": 2
        }"#;
        let line: CartLine = serde_json::from_str(json).unwrap();
        assert_eq!(line.id, CartLineId::new(7));
        assert_eq!(line.product.id, ProductId::new(42));
        assert_eq!(line.product.name, "Phone");
        assert_eq!(line.quantity, 2);
        assert_eq!(line.line_total(), Decimal::from_str("29999.0").unwrap());
    }

    #[test]
    fn test_snapshot_derived_values() {
        let snapshot = CartSnapshot {
            lines: vec![line(1, 10, "100.00", 2), line(2, 11, "49.50", 1)],
        };
        assert_eq!(snapshot.item_count(), 3);
        assert_eq!(
            snapshot.grand_total().amount,
            Decimal::from_str("249.50").unwrap()
        );
        assert!(snapshot.contains_product(ProductId::new(11)));
        assert!(snapshot.line(CartLineId::new(3)).is_none());
    }
}
