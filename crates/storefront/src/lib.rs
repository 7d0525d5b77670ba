//! ElectroKart storefront client.
//!
//! Coordinates a front end with the ElectroKart REST API: the session and
//! its refresh-token recovery, the cart and wishlist aggregates, the order
//! workflow including the online payment handshake, and the admin client.
//!
//! [`Storefront`] wires everything together:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use electrokart_storefront::{ClientConfig, Storefront, services::PaymentWidget};
//! # async fn run(widget: Arc<dyn PaymentWidget>) -> electrokart_storefront::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let storefront = Storefront::connect(&config, widget)?;
//! storefront.sync().await?;
//! println!("{} items in cart", storefront.cart().item_count());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod services;
pub mod session;
pub mod state;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClientConfig, ConfigError};
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayError};
pub use session::{AuthService, SessionEvent, SessionStore};
pub use state::{Storefront, StorefrontOptions};
