//! Catalog products and the denormalized product snapshot used by lines.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use electrokart_core::{Price, ProductId};

/// A catalog product as returned by `GET /Products`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(alias = "productId")]
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default, alias = "stockQuantity")]
    pub stock: Option<i32>,
}

impl Product {
    /// Unit price in the store currency.
    #[must_use]
    pub fn unit_price(&self) -> Price {
        Price::store(self.price)
    }

    /// Whether the backend reports stock left. Unknown stock counts as available.
    #[must_use]
    pub fn in_stock(&self) -> bool {
        self.stock.is_none_or(|stock| stock > 0)
    }
}

/// Product fields copied onto cart lines and wishlist entries.
///
/// The copy is taken by the server when the line is created, so the name
/// and price may lag behind the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    #[serde(rename = "productId")]
    pub id: ProductId,
    #[serde(rename = "productName", alias = "name")]
    pub name: String,
    pub price: Decimal,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
}

impl From<&Product> for ProductRef {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            price: product.price,
            image_url: product.image_url.clone(),
        }
    }
}
