//! Wishlist aggregate.
//!
//! Same lifecycle as the cart, minus quantities. A failed fetch degrades to
//! an empty list so the page still renders.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use electrokart_core::ProductId;

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::models::{ListPayload, WishlistEntry, WishlistSnapshot};

use super::aggregate::{Synced, ensure_success, require_session};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddRequest {
    product_id: ProductId,
}

/// Wishlist service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WishlistService {
    inner: Arc<WishlistInner>,
}

struct WishlistInner {
    gateway: Gateway,
    state: Synced<WishlistSnapshot>,
}

impl WishlistService {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            inner: Arc::new(WishlistInner {
                gateway,
                state: Synced::new(),
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> WishlistSnapshot {
        self.inner.state.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WishlistSnapshot> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.is_loading()
    }

    /// Whether the product is on the local wishlist.
    #[must_use]
    pub fn is_present(&self, product_id: ProductId) -> bool {
        self.inner.state.inspect(|list| list.contains(product_id))
    }

    /// Replace local state with the server's wishlist.
    ///
    /// Without a session the local list is emptied and no request is made.
    ///
    /// # Errors
    ///
    /// Returns the failure after emptying the local list.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<()> {
        if !self.inner.gateway.session().is_authenticated() {
            self.inner.state.reset();
            return Ok(());
        }

        let _loading = self.inner.state.loading();
        let ticket = self.inner.state.begin_fetch();
        let result = self
            .inner
            .gateway
            .get::<ListPayload<WishlistEntry>>("/Wishlist")
            .await
            .map_err(Error::from)
            .and_then(|envelope| ensure_success(envelope, "Could not load your wishlist"));

        let entries = match result {
            Ok(data) => data.map(ListPayload::into_vec).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Wishlist fetch failed, showing an empty list");
                self.inner.state.apply_fetch(ticket, WishlistSnapshot::default());
                return Err(e);
            }
        };

        if !self
            .inner
            .state
            .apply_fetch(ticket, WishlistSnapshot { entries })
        {
            debug!("Discarding stale wishlist response");
        }
        Ok(())
    }

    /// Save a product.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::InvalidProduct` for an unresolvable product id
    /// - `Error::AlreadyInWishlist` if the product is already saved (no request is made)
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add(&self, product_id: ProductId) -> Result<()> {
        require_session(self.inner.gateway.session())?;
        if !product_id.is_resolvable() {
            return Err(Error::InvalidProduct(product_id.to_string()));
        }
        if self.is_present(product_id) {
            return Err(Error::AlreadyInWishlist(product_id));
        }

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .post::<_, serde_json::Value>("/Wishlist/add", &AddRequest { product_id })
            .await?;
        ensure_success(envelope, "Could not add to your wishlist")?;

        self.reconcile().await;
        Ok(())
    }

    /// Remove a product, then reconcile with the server.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove(&self, product_id: ProductId) -> Result<()> {
        require_session(self.inner.gateway.session())?;

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .delete::<serde_json::Value>(&format!("/Wishlist/remove/{product_id}"))
            .await?;
        ensure_success(envelope, "Could not remove from your wishlist")?;

        self.inner.state.modify(|list| {
            let before = list.entries.len();
            list.entries.retain(|entry| entry.product.id != product_id);
            list.entries.len() != before
        });
        self.reconcile().await;
        Ok(())
    }

    /// Empty the wishlist on the server.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self))]
    pub async fn clear_remote(&self) -> Result<()> {
        require_session(self.inner.gateway.session())?;

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .delete::<serde_json::Value>("/Wishlist/clear")
            .await?;
        ensure_success(envelope, "Could not clear your wishlist")?;

        self.inner.state.reset();
        self.reconcile().await;
        Ok(())
    }

    /// Drop local state without contacting the server (logout teardown).
    pub fn clear_local(&self) {
        self.inner.state.reset();
    }

    async fn reconcile(&self) {
        if let Err(e) = self.fetch().await {
            warn!(error = %e, "Wishlist reconcile failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::Role;
    use reqwest::Method;

    use super::*;
    use crate::testing::FakeBackend;

    fn signed_in() -> (FakeBackend, WishlistService) {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        (backend, WishlistService::new(gateway))
    }

    #[tokio::test]
    async fn test_fetch_without_session_is_local() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        let wishlist = WishlistService::new(gateway);

        wishlist.fetch().await.unwrap();

        assert!(wishlist.snapshot().is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_duplicate() {
        let (backend, wishlist) = signed_in();

        wishlist.add(ProductId::new(42)).await.unwrap();
        assert!(wishlist.is_present(ProductId::new(42)));

        let err = wishlist.add(ProductId::new(42)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInWishlist(_)));
        assert_eq!(backend.count(Method::POST, "/Wishlist/add"), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_empty() {
        let (backend, wishlist) = signed_in();
        wishlist.add(ProductId::new(42)).await.unwrap();
        backend.fail_next("/Wishlist", 500);

        assert!(wishlist.fetch().await.is_err());
        assert!(wishlist.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let (_backend, wishlist) = signed_in();
        wishlist.add(ProductId::new(42)).await.unwrap();
        wishlist.add(ProductId::new(7)).await.unwrap();

        wishlist.remove(ProductId::new(42)).await.unwrap();

        assert!(!wishlist.is_present(ProductId::new(42)));
        assert!(wishlist.is_present(ProductId::new(7)));
    }

    #[tokio::test]
    async fn test_remove_reconciles_with_server() {
        let (backend, wishlist) = signed_in();
        wishlist.add(ProductId::new(42)).await.unwrap();
        let fetches = backend.count(Method::GET, "/Wishlist");

        wishlist.remove(ProductId::new(42)).await.unwrap();

        assert_eq!(backend.count(Method::GET, "/Wishlist"), fetches + 1);
        assert!(wishlist.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_clear_local_versus_remote() {
        let (backend, wishlist) = signed_in();
        wishlist.add(ProductId::new(42)).await.unwrap();

        wishlist.clear_local();
        assert!(wishlist.snapshot().is_empty());
        assert_eq!(backend.count(Method::DELETE, "/Wishlist/clear"), 0);

        // Still saved server-side
        wishlist.fetch().await.unwrap();
        assert_eq!(wishlist.snapshot().len(), 1);

        wishlist.clear_remote().await.unwrap();
        wishlist.fetch().await.unwrap();
        assert!(wishlist.snapshot().is_empty());
        assert_eq!(backend.count(Method::DELETE, "/Wishlist/clear"), 1);
    }
}
