//! Cart aggregate: the server-side cart of the active session.
//!
//! `add`, `remove` and `clear` apply local state only after the server
//! confirms, then reconcile with a full fetch. `update_quantity` is the one
//! optimistic mutation; it patches first and rolls back on failure.
//! Overlapping updates of one line settle on the last quantity the server
//! confirmed, published by whichever update finishes last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use electrokart_core::{CartLineId, ProductId};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::models::{CartLine, CartSnapshot, ListPayload};

use super::aggregate::{Synced, ensure_success, require_session};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddRequest {
    product_id: ProductId,
    quantity: u32,
}

#[derive(Serialize)]
struct UpdateRequest {
    quantity: u32,
}

/// Cart service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<CartInner>,
}

struct CartInner {
    gateway: Gateway,
    state: Synced<CartSnapshot>,
    edits: Mutex<HashMap<CartLineId, PendingEdit>>,
}

/// Quantity updates in flight for one line.
#[derive(Debug)]
struct PendingEdit {
    /// Last quantity the server accepted (or held before the first update).
    confirmed: u32,
    in_flight: usize,
}

impl CartService {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            inner: Arc::new(CartInner {
                gateway,
                state: Synced::new(),
                edits: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The cart as last confirmed by the server.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.state.snapshot()
    }

    /// Watch cart snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.state.subscribe()
    }

    /// Sum of quantities across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.inner.state.inspect(CartSnapshot::item_count)
    }

    /// Whether a cart request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.is_loading()
    }

    /// Replace local state with the server's cart.
    ///
    /// Without a session the local cart is emptied and no request is made.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthenticated` if the session could not be refreshed
    /// (local state is emptied), or the gateway error otherwise.
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
            .get::<ListPayload<CartLine>>("/Cart")
            .await
            .map_err(Error::from)
            .and_then(|envelope| ensure_success(envelope, "Could not load your cart"));

        let lines = match result {
            Ok(data) => data.map(ListPayload::into_vec).unwrap_or_default(),
            Err(Error::Unauthenticated) => {
                self.inner.state.reset();
                return Err(Error::Unauthenticated);
            }
            Err(e) => return Err(e),
        };

        if !self
            .inner
            .state
            .apply_fetch(ticket, CartSnapshot { lines })
        {
            debug!("Discarding stale cart response");
        }
        Ok(())
    }

    /// Add a product to the cart.
    ///
    /// Lines are not merged: adding a product that is already in the cart is
    /// up to the server to accept or reject.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session (no request is made)
    /// - `Error::InvalidProduct` for an unresolvable product id
    /// - `Error::Validation` for a zero quantity
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        require_session(self.inner.gateway.session())?;
        if !product_id.is_resolvable() {
            return Err(Error::InvalidProduct(product_id.to_string()));
        }
        if quantity == 0 {
            return Err(Error::Validation("Quantity must be at least 1".to_string()));
        }

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .post::<_, serde_json::Value>(
                "/Cart/add",
                &AddRequest {
                    product_id,
                    quantity,
                },
            )
            .await?;
        ensure_success(envelope, "Could not add the item to your cart")?;

        self.reconcile().await;
        Ok(())
    }

    /// Change a line's quantity. Below 1 the line is removed instead.
    ///
    /// The local line is patched before the request. If it fails and no other
    /// update of the line is in flight, the last confirmed quantity is restored.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn update_quantity(&self, line_id: CartLineId, quantity: i32) -> Result<()> {
        let Ok(quantity) = u32::try_from(quantity) else {
            return self.remove(line_id).await;
        };
        if quantity == 0 {
            return self.remove(line_id).await;
        }
        require_session(self.inner.gateway.session())?;

        let previous = self
            .inner
            .state
            .inspect(|cart| cart.line(line_id).map(|line| line.quantity));
        let edit = previous.map(|previous| {
            let edit = self.begin_edit(line_id, previous);
            self.set_line_quantity(line_id, quantity);
            edit
        });

        let _loading = self.inner.state.loading();
        let result = self
            .inner
            .gateway
            .put::<_, serde_json::Value>(
                &format!("/Cart/update/{line_id}"),
                &UpdateRequest { quantity },
            )
            .await
            .map_err(Error::from)
            .and_then(|envelope| ensure_success(envelope, "Could not update the quantity"));

        if let Some(edit) = edit {
            edit.settle(result.as_ref().ok().map(|_| quantity));
        }
        result.map(|_| ())
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn remove(&self, line_id: CartLineId) -> Result<()> {
        require_session(self.inner.gateway.session())?;

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .delete::<serde_json::Value>(&format!("/Cart/remove/{line_id}"))
            .await?;
        ensure_success(envelope, "Could not remove the item")?;

        self.inner.state.modify(|cart| {
            let before = cart.lines.len();
            cart.lines.retain(|line| line.id != line_id);
            cart.lines.len() != before
        });
        self.reconcile().await;
        Ok(())
    }

    /// Empty the cart on the server.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Rejected` / `Error::Gateway` if the server refuses
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        require_session(self.inner.gateway.session())?;

        let _loading = self.inner.state.loading();
        let envelope = self
            .inner
            .gateway
            .delete::<serde_json::Value>("/Cart/clear")
            .await?;
        ensure_success(envelope, "Could not clear your cart")?;

        self.inner.state.reset();
        self.reconcile().await;
        Ok(())
    }

    /// Drop local state without contacting the server.
    pub fn clear_local(&self) {
        self.inner.state.reset();
    }

    /// Refetch after a confirmed mutation. Failure keeps the local state.
    async fn reconcile(&self) {
        if let Err(e) = self.fetch().await {
            warn!(error = %e, "Cart reconcile failed, keeping local state");
        }
    }

    fn begin_edit(&self, line_id: CartLineId, current: u32) -> EditGuard<'_> {
        let mut edits = self.inner.edits.lock().unwrap_or_else(PoisonError::into_inner);
        edits
            .entry(line_id)
            .or_insert(PendingEdit {
                confirmed: current,
                in_flight: 0,
            })
            .in_flight += 1;
        EditGuard {
            cart: self,
            line_id,
            settled: false,
        }
    }

    fn set_line_quantity(&self, line_id: CartLineId, quantity: u32) {
        self.inner.state.modify(|cart| {
            cart.lines
                .iter_mut()
                .find(|line| line.id == line_id)
                .is_some_and(|line| {
                    line.quantity = quantity;
                    true
                })
        });
    }
}

/// One in-flight quantity update. Dropping it unsettled (cancellation)
/// releases the slot without touching local state.
struct EditGuard<'a> {
    cart: &'a CartService,
    line_id: CartLineId,
    settled: bool,
}

impl EditGuard<'_> {
    /// Record the outcome. The last update to finish publishes the confirmed
    /// quantity.
    fn settle(mut self, accepted: Option<u32>) {
        self.settled = true;
        if let Some(confirmed) = self.release(accepted) {
            if accepted.is_none() {
                debug!(confirmed, "Rolling back quantity update");
            }
            let current = self
                .cart
                .inner
                .state
                .inspect(|cart| cart.line(self.line_id).map(|line| line.quantity));
            if current.is_some_and(|current| current != confirmed) {
                self.cart.set_line_quantity(self.line_id, confirmed);
            }
        }
    }

    /// Returns the confirmed quantity if this was the last update in flight.
    fn release(&self, accepted: Option<u32>) -> Option<u32> {
        let mut edits = self
            .cart
            .inner
            .edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let edit = edits.get_mut(&self.line_id)?;
        if let Some(quantity) = accepted {
            edit.confirmed = quantity;
        }
        edit.in_flight = edit.in_flight.saturating_sub(1);
        if edit.in_flight > 0 {
            return None;
        }
        edits.remove(&self.line_id).map(|edit| edit.confirmed)
    }
}

impl Drop for EditGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.release(None);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use electrokart_core::Role;
    use reqwest::Method;

    use super::*;
    use crate::testing::FakeBackend;

    fn signed_in() -> (FakeBackend, CartService) {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        (backend, CartService::new(gateway))
    }

    #[tokio::test]
    async fn test_fetch_without_session_is_local() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        let cart = CartService::new(gateway);

        cart.fetch().await.unwrap();

        assert!(cart.snapshot().is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_add_without_session_short_circuits() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        let cart = CartService::new(gateway);

        let err = cart.add(ProductId::new(42), 1).await.unwrap_err();

        assert!(matches!(err, Error::Unauthenticated));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_unresolvable_product() {
        let (backend, cart) = signed_in();

        let err = cart.add(ProductId::new(0), 1).await.unwrap_err();

        assert!(matches!(err, Error::InvalidProduct(_)));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_add_reconciles_with_server() {
        let (backend, cart) = signed_in();

        cart.add(ProductId::new(42), 2).await.unwrap();

        let snapshot = cart.snapshot();
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.lines[0].product.id, ProductId::new(42));
        assert_eq!(snapshot.lines[0].quantity, 2);
        assert_eq!(cart.item_count(), 2);
        assert_eq!(backend.count(Method::GET, "/Cart"), 1);
        assert!(!cart.is_loading());
    }

    #[tokio::test]
    async fn test_repeat_add_keeps_single_line() {
        let (_backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();

        assert!(cart.add(ProductId::new(42), 3).await.is_err());

        cart.fetch().await.unwrap();
        let snapshot = cart.snapshot();
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.lines[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_update_quantity_zero_removes_line() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;

        cart.update_quantity(line_id, 0).await.unwrap();

        assert!(cart.snapshot().line(line_id).is_none());
        assert_eq!(
            backend.count(Method::DELETE, &format!("/Cart/remove/{line_id}")),
            1
        );
        assert_eq!(backend.count(Method::PUT, &format!("/Cart/update/{line_id}")), 0);
    }

    #[tokio::test]
    async fn test_update_quantity_zero_matches_remove() {
        let (_b1, by_update) = signed_in();
        let (_b2, by_remove) = signed_in();
        for cart in [&by_update, &by_remove] {
            cart.add(ProductId::new(42), 1).await.unwrap();
            cart.add(ProductId::new(7), 2).await.unwrap();
        }
        let target = |cart: &CartService| {
            cart.snapshot()
                .lines
                .iter()
                .find(|line| line.product.id == ProductId::new(42))
                .unwrap()
                .id
        };

        by_update
            .update_quantity(target(&by_update), -3)
            .await
            .unwrap();
        by_remove.remove(target(&by_remove)).await.unwrap();

        let products = |cart: &CartService| {
            cart.snapshot()
                .lines
                .iter()
                .map(|line| (line.product.id, line.quantity))
                .collect::<Vec<_>>()
        };
        assert_eq!(products(&by_update), products(&by_remove));
    }

    #[tokio::test]
    async fn test_update_quantity_patches_in_place() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        let fetches = backend.count(Method::GET, "/Cart");

        cart.update_quantity(line_id, 4).await.unwrap();

        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 4);
        assert_eq!(backend.count(Method::GET, "/Cart"), fetches);
    }

    #[tokio::test]
    async fn test_update_quantity_rolls_back_on_failure() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 2).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        backend.fail_next(&format!("/Cart/update/{line_id}"), 500);

        let err = cart.update_quantity(line_id, 5).await.unwrap_err();

        assert!(matches!(err, Error::Gateway(_)));
        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 2);
    }

    /// Sends `first` (held 30ms) and `second` 5ms later to the same line.
    async fn overlapping_updates(
        cart: &CartService,
        line_id: CartLineId,
        first: i32,
        second: i32,
    ) -> (Result<()>, Result<()>) {
        let later = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cart.update_quantity(line_id, second).await
        };
        tokio::join!(cart.update_quantity(line_id, first), later)
    }

    #[tokio::test]
    async fn test_failed_update_does_not_undo_later_confirmed_update() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        let path = format!("/Cart/update/{line_id}");
        backend.hold_next(&path, Duration::from_millis(30), Some(500));

        let (first, second) = overlapping_updates(&cart, line_id, 3, 5).await;

        assert!(first.is_err());
        second.unwrap();
        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 5);
        cart.fetch().await.unwrap();
        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_late_success_wins_over_earlier_failure() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        let path = format!("/Cart/update/{line_id}");
        backend.hold_next(&path, Duration::from_millis(30), None);
        backend.hold_next(&path, Duration::ZERO, Some(500));

        let (first, second) = overlapping_updates(&cart, line_id, 3, 5).await;

        first.unwrap();
        assert!(second.is_err());
        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_overlapping_failures_restore_original_quantity() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 2).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        let path = format!("/Cart/update/{line_id}");
        backend.hold_next(&path, Duration::from_millis(30), Some(500));
        backend.hold_next(&path, Duration::ZERO, Some(503));

        let (first, second) = overlapping_updates(&cart, line_id, 3, 5).await;

        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(cart.snapshot().line(line_id).unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_line() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();
        let line_id = cart.snapshot().lines[0].id;
        backend.fail_next(&format!("/Cart/remove/{line_id}"), 503);

        assert!(cart.remove(line_id).await.is_err());
        assert!(cart.snapshot().line(line_id).is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let (backend, cart) = signed_in();
        cart.add(ProductId::new(42), 1).await.unwrap();

        cart.clear().await.unwrap();

        assert!(cart.snapshot().is_empty());
        assert_eq!(backend.count(Method::DELETE, "/Cart/clear"), 1);
    }
}
