//! Service container shared across the front end.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError, ReqwestTransport, Transport};
use crate::services::{
    AdminService, CartService, CatalogService, CheckoutService, OrderService, PaymentWidget,
    WidgetSettings, WishlistService,
};
use crate::session::{AuthService, SessionEvent, SessionStore};
use crate::storage::{FileStorage, Storage};

/// Settings that are not about where the API lives.
#[derive(Debug, Clone)]
pub struct StorefrontOptions {
    pub catalog_ttl: Duration,
    pub widget: WidgetSettings,
}

impl Default for StorefrontOptions {
    fn default() -> Self {
        Self {
            catalog_ttl: crate::services::DEFAULT_CATALOG_TTL,
            widget: WidgetSettings::default(),
        }
    }
}

impl From<&ClientConfig> for StorefrontOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            catalog_ttl: config.catalog_ttl,
            widget: WidgetSettings {
                payment_key: config.payment_key.clone(),
                store_name: config.store_name.clone(),
                theme_color: config.theme_color.clone(),
            },
        }
    }
}

/// Every storefront service, wired to one session and one gateway.
///
/// This struct is cheaply cloneable via `Arc`. Construct it once at start-up
/// and hand clones to whatever needs them.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    session: SessionStore,
    gateway: Gateway,
    auth: AuthService,
    catalog: CatalogService,
    cart: CartService,
    wishlist: WishlistService,
    orders: OrderService,
    checkout: CheckoutService,
    admin: AdminService,
}

impl Storefront {
    /// Build the container over file storage and the `reqwest` transport,
    /// restoring any persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory or the HTTP client cannot be
    /// created.
    pub fn connect(config: &ClientConfig, widget: Arc<dyn PaymentWidget>) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(&config.state_dir)?);
        let transport = ReqwestTransport::new(
            &config.api_url,
            config.http_timeout,
            Arc::clone(&storage),
        )
        .map_err(|e| Error::Gateway(GatewayError::Network(e)))?;

        Ok(Self::from_parts(
            Arc::new(transport),
            storage,
            widget,
            StorefrontOptions::from(config),
        ))
    }

    /// Build the container over explicit parts, restoring any persisted
    /// session from `storage`.
    #[must_use]
    pub fn from_parts(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        widget: Arc<dyn PaymentWidget>,
        options: StorefrontOptions,
    ) -> Self {
        let session = SessionStore::new(Arc::clone(&storage));
        session.restore();

        let gateway = Gateway::new(transport, session.clone(), storage);
        let cart = CartService::new(gateway.clone());
        let checkout = CheckoutService::new(gateway.clone(), cart.clone(), widget, options.widget);

        let inner = Arc::new(StorefrontInner {
            auth: AuthService::new(gateway.clone()),
            catalog: CatalogService::new(gateway.clone(), options.catalog_ttl),
            wishlist: WishlistService::new(gateway.clone()),
            orders: OrderService::new(gateway.clone()),
            admin: AdminService::new(gateway.clone()),
            session,
            gateway,
            cart,
            checkout,
        });
        spawn_session_listener(&inner);

        Self { inner }
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.inner.catalog
    }

    #[must_use]
    pub fn cart(&self) -> &CartService {
        &self.inner.cart
    }

    #[must_use]
    pub fn wishlist(&self) -> &WishlistService {
        &self.inner.wishlist
    }

    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.inner.orders
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn admin(&self) -> &AdminService {
        &self.inner.admin
    }

    /// Fetch cart and wishlist together.
    ///
    /// # Errors
    ///
    /// Returns the first failure, checking the cart before the wishlist.
    pub async fn sync(&self) -> Result<()> {
        let (cart, wishlist) = tokio::join!(self.inner.cart.fetch(), self.inner.wishlist.fetch());
        cart.and(wishlist)
    }

    /// Log out and drop all session-scoped local state.
    pub async fn logout(&self) {
        self.inner.auth.logout().await;
        self.clear_local();
    }

    fn clear_local(&self) {
        self.inner.cart.clear_local();
        self.inner.wishlist.clear_local();
        self.inner.checkout.reset();
    }
}

/// Empty the aggregates whenever the session ends, including when the
/// gateway expires it. Stops once the container is dropped.
fn spawn_session_listener(inner: &Arc<StorefrontInner>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("No async runtime, session listener not started");
        return;
    };

    let mut events = inner.session.subscribe();
    let weak: Weak<StorefrontInner> = Arc::downgrade(inner);
    runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Expired | SessionEvent::SignedOut) => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.cart.clear_local();
                    inner.wishlist.clear_local();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::{ProductId, Role};
    use secrecy::SecretString;

    use super::*;
    use crate::testing::{FakeBackend, ScriptedWidget};

    #[tokio::test]
    async fn test_session_survives_restart() {
        let backend = FakeBackend::with_catalog();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);

        let first = backend.storefront(ScriptedWidget::completing());
        first
            .auth()
            .login("a@b.com", &SecretString::from("secret1"))
            .await
            .unwrap();
        drop(first);

        let second = backend.storefront(ScriptedWidget::completing());
        assert!(second.session().is_authenticated());
        second.cart().add(ProductId::new(42), 1).await.unwrap();
        assert_eq!(second.cart().item_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_aggregates() {
        let backend = FakeBackend::with_catalog();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);
        let storefront = backend.storefront(ScriptedWidget::completing());
        storefront
            .auth()
            .login("a@b.com", &SecretString::from("secret1"))
            .await
            .unwrap();
        storefront.cart().add(ProductId::new(42), 1).await.unwrap();
        storefront.wishlist().add(ProductId::new(7)).await.unwrap();

        storefront.logout().await;

        assert!(!storefront.session().is_authenticated());
        assert!(storefront.cart().snapshot().is_empty());
        assert!(storefront.wishlist().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_empties_aggregates() {
        let backend = FakeBackend::with_catalog();
        backend.shop().add_user("A", "a@b.com", "secret1", Role::Customer);
        let storefront = backend.storefront(ScriptedWidget::completing());
        storefront
            .auth()
            .login("a@b.com", &SecretString::from("secret1"))
            .await
            .unwrap();
        storefront.wishlist().add(ProductId::new(7)).await.unwrap();
        let mut events = storefront.session().subscribe();

        backend.shop().expire_access_tokens();
        backend.shop().faults().refresh_fails = true;
        let err = storefront.cart().fetch().await.unwrap_err();

        assert!(err.requires_login());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
        // Let the listener run
        tokio::task::yield_now().await;
        assert!(storefront.wishlist().snapshot().is_empty());
    }
}
