//! Admin client: user and order management.
//!
//! Every call requires a session with [`Role::Admin`]; other sessions get
//! `Error::Forbidden` without a request being made.

use serde::Serialize;
use tracing::{info, instrument};

use electrokart_core::{OrderId, OrderStatus, Role, UserId};

use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError};
use crate::models::{ListPayload, Order, UserSummary};

use super::aggregate::ensure_success;

#[derive(Serialize)]
struct RoleUpdate {
    role: Role,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: OrderStatus,
}

/// Admin client.
#[derive(Clone)]
pub struct AdminService {
    gateway: Gateway,
}

impl AdminService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// All accounts.
    ///
    /// # Errors
    ///
    /// `Error::Unauthenticated` / `Error::Forbidden` for the wrong session,
    /// otherwise the gateway error.
    #[instrument(skip(self))]
    pub async fn users(&self) -> Result<Vec<UserSummary>> {
        self.require_admin()?;
        let envelope = self
            .gateway
            .get::<ListPayload<UserSummary>>("/admin/users")
            .await
            .map_err(admin_error)?;
        Ok(ensure_success(envelope, "Could not load users")?
            .map(ListPayload::into_vec)
            .unwrap_or_default())
    }

    /// Change an account's role.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown user, otherwise as [`AdminService::users`].
    #[instrument(skip(self), fields(user_id = %user_id, %role))]
    pub async fn update_user_role(&self, user_id: UserId, role: Role) -> Result<()> {
        self.require_admin()?;
        let envelope = self
            .gateway
            .put::<_, serde_json::Value>(&format!("/admin/users/{user_id}"), &RoleUpdate { role })
            .await
            .map_err(|e| not_found(e, || format!("User {user_id}")))?;
        ensure_success(envelope, "Could not update the user")?;
        info!("User role updated");
        Ok(())
    }

    /// Delete an account.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown user, otherwise as [`AdminService::users`].
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_user(&self, user_id: UserId) -> Result<()> {
        self.require_admin()?;
        let envelope = self
            .gateway
            .delete::<serde_json::Value>(&format!("/admin/users/{user_id}"))
            .await
            .map_err(|e| not_found(e, || format!("User {user_id}")))?;
        ensure_success(envelope, "Could not delete the user")?;
        info!("User deleted");
        Ok(())
    }

    /// Every order in the store.
    ///
    /// # Errors
    ///
    /// As [`AdminService::users`].
    #[instrument(skip(self))]
    pub async fn all_orders(&self) -> Result<Vec<Order>> {
        self.require_admin()?;
        let envelope = self
            .gateway
            .get::<ListPayload<Order>>("/Orders/all-orders")
            .await
            .map_err(admin_error)?;
        Ok(ensure_success(envelope, "Could not load orders")?
            .map(ListPayload::into_vec)
            .unwrap_or_default())
    }

    /// Move an order to `status`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown order, otherwise as [`AdminService::users`].
    #[instrument(skip(self), fields(order_id = %order_id, %status))]
    pub async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        self.require_admin()?;
        let envelope = self
            .gateway
            .patch::<_, serde_json::Value>(
                &format!("/Orders/{order_id}/status"),
                &StatusUpdate { status },
            )
            .await
            .map_err(|e| not_found(e, || format!("Order {order_id}")))?;
        ensure_success(envelope, "Could not update the order")?;
        info!("Order status updated");
        Ok(())
    }

    fn require_admin(&self) -> Result<()> {
        match self.gateway.session().identity() {
            None => Err(Error::Unauthenticated),
            Some(identity) if identity.is_admin() => Ok(()),
            Some(identity) => Err(Error::Forbidden(format!(
                "{} is not an administrator",
                identity.username
            ))),
        }
    }
}

fn admin_error(error: GatewayError) -> Error {
    match error {
        GatewayError::Client {
            status: 403,
            message,
        } => Error::Forbidden(message),
        other => other.into(),
    }
}

fn not_found(error: GatewayError, what: impl FnOnce() -> String) -> Error {
    match error {
        GatewayError::Client { status: 404, .. } => Error::NotFound(what()),
        other => admin_error(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::PaymentMethod;

    use super::*;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn test_customer_is_forbidden_without_request() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let admin = AdminService::new(gateway);

        assert!(matches!(admin.users().await.unwrap_err(), Error::Forbidden(_)));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_user_management() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "Root", "root@b.com", Role::Admin);
        let customer = backend
            .shop()
            .add_user("A", "a@b.com", "secret1", Role::Customer);
        let admin = AdminService::new(gateway);

        let users = admin.users().await.unwrap();
        assert_eq!(users.len(), 2);

        admin.update_user_role(customer, Role::Admin).await.unwrap();
        let promoted = admin
            .users()
            .await
            .unwrap()
            .into_iter()
            .find(|u| u.id == customer)
            .unwrap();
        assert_eq!(promoted.role, Role::Admin);

        admin.delete_user(customer).await.unwrap();
        assert_eq!(admin.users().await.unwrap().len(), 1);
        assert!(matches!(
            admin.delete_user(customer).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_order_status_update() {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "Root", "root@b.com", Role::Admin);
        let order_id = backend
            .shop()
            .seed_order("root@b.com", PaymentMethod::CashOnDelivery);
        let admin = AdminService::new(gateway);

        admin
            .update_order_status(order_id, OrderStatus::Shipped)
            .await
            .unwrap();

        let orders = admin.all_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Shipped);
    }
}
