//! Wishlist entries.

use serde::{Deserialize, Serialize};

use electrokart_core::{ProductId, WishlistEntryId};

use super::ProductRef;

/// A saved product. Entries are created and removed, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistEntry {
    #[serde(rename = "id", alias = "wishlistItemId")]
    pub id: WishlistEntryId,
    #[serde(flatten)]
    pub product: ProductRef,
}

/// The wishlist as last confirmed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WishlistSnapshot {
    pub entries: Vec<WishlistEntry>,
}

impl WishlistSnapshot {
    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.entries.iter().any(|entry| entry.product.id == product_id)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
