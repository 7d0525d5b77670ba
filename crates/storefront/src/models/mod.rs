//! Wire and domain models for the ElectroKart REST API.
//!
//! Field names follow the backend's camelCase JSON. Aliases cover the
//! handful of places where the two backend variants disagree on a name.

pub mod cart;
pub mod envelope;
pub mod order;
pub mod product;
pub mod session;
pub mod user;
pub mod wishlist;

pub use cart::{CartLine, CartSnapshot};
pub use envelope::{ApiEnvelope, ListPayload};
pub use order::{CheckoutItem, CheckoutPayload, CreatedOrder, Order, OrderItem};
pub use product::{Product, ProductRef};
pub use session::{Identity, Session};
pub use user::UserSummary;
pub use wishlist::{WishlistEntry, WishlistSnapshot};
