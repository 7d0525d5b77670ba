//! ElectroKart Core - Shared domain types.
//!
//! This crate provides the vocabulary used by every ElectroKart component:
//! - `storefront` - Session, gateway, cart, wishlist and checkout coordination
//! - `cli` - Terminal front end over the storefront layer
//! - `integration-tests` - Mock backend and end-to-end tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, emails, roles and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
