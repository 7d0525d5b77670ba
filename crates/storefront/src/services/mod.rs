//! Services over the gateway: catalog, aggregates, orders, checkout, admin.

pub mod admin;
pub(crate) mod aggregate;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod orders;
pub mod payment;
pub mod wishlist;

pub use admin::AdminService;
pub use cart::CartService;
pub use catalog::{CatalogService, DEFAULT_CATALOG_TTL};
pub use checkout::{CheckoutReceipt, CheckoutService, CheckoutState, WidgetSettings};
pub use orders::OrderService;
pub use payment::{
    PaymentAttempt, PaymentIntent, PaymentService, PaymentWidget, Prefill, ProviderPayment, Theme,
    WidgetOptions, WidgetOutcome,
};
pub use wishlist::WishlistService;
