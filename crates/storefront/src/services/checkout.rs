//! Checkout workflow.
//!
//! ```text
//! Idle -> Validating -> Creating -> Completed                      (cash on delivery)
//!                                \-> AwaitingPayment -> Completed  (online)
//! any step -> Failed
//! ```
//!
//! Validation happens before any request. The cart is cleared only once the
//! order is final: immediately for cash on delivery, after the server
//! confirms the provider's payment for online orders. A failed or cancelled
//! payment keeps the cart; the order stays on the server in whatever status
//! the server gave it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use electrokart_core::{OrderId, PaymentMethod, Price};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::models::{CartSnapshot, CheckoutItem, CheckoutPayload, CreatedOrder, Identity};

use super::aggregate::require_session;
use super::cart::CartService;
use super::orders::OrderService;
use super::payment::{
    PaymentAttempt, PaymentService, PaymentWidget, Prefill, Theme, WidgetOptions, WidgetOutcome,
};

/// Where the workflow is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckoutState {
    #[default]
    Idle,
    Validating,
    Creating,
    AwaitingPayment {
        order_id: OrderId,
    },
    Completed(CheckoutReceipt),
    Failed {
        reason: String,
    },
}

impl CheckoutState {
    /// A checkout is running; a new one would be rejected.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::Creating | Self::AwaitingPayment { .. }
        )
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    /// Absent only if the server omitted it for a cash-on-delivery order.
    pub order_id: Option<OrderId>,
    pub total: Price,
    pub payment_method: PaymentMethod,
    /// Provider payment id for online orders.
    pub payment_id: Option<String>,
}

/// Branding and merchant settings handed to the payment widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetSettings {
    /// Merchant key used when the server does not return one.
    pub payment_key: Option<String>,
    pub store_name: String,
    pub theme_color: String,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            payment_key: None,
            store_name: "ElectroKart".to_string(),
            theme_color: "#3399cc".to_string(),
        }
    }
}

/// Checkout workflow. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CheckoutService {
    inner: Arc<CheckoutInner>,
}

struct CheckoutInner {
    gateway: Gateway,
    cart: CartService,
    orders: OrderService,
    payments: PaymentService,
    widget: Arc<dyn PaymentWidget>,
    settings: WidgetSettings,
    state: watch::Sender<CheckoutState>,
}

/// Marks the run failed if it is dropped before reaching a terminal state.
struct RunGuard<'a> {
    state: &'a watch::Sender<CheckoutState>,
    settled: bool,
}

impl RunGuard<'_> {
    fn advance(&self, next: CheckoutState) {
        self.state.send_replace(next);
    }

    fn settle(mut self, last: CheckoutState) {
        self.settled = true;
        self.state.send_replace(last);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.send_replace(CheckoutState::Failed {
                reason: "Checkout was interrupted".to_string(),
            });
        }
    }
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        gateway: Gateway,
        cart: CartService,
        widget: Arc<dyn PaymentWidget>,
        settings: WidgetSettings,
    ) -> Self {
        let (state, _) = watch::channel(CheckoutState::Idle);
        Self {
            inner: Arc::new(CheckoutInner {
                orders: OrderService::new(gateway.clone()),
                payments: PaymentService::new(gateway.clone()),
                gateway,
                cart,
                widget,
                settings,
                state,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> CheckoutState {
        self.inner.state.borrow().clone()
    }

    /// Watch workflow progress.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutState> {
        self.inner.state.subscribe()
    }

    /// Return a finished workflow to `Idle`. Does nothing while busy.
    pub fn reset(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = CheckoutState::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Place an order from the current cart.
    ///
    /// # Errors
    ///
    /// - `Error::CheckoutInProgress` while another checkout runs
    /// - `Error::Unauthenticated` without a session
    /// - `Error::Validation` for an empty cart or blank address (no request is made)
    /// - `Error::InvalidOrderData` for a line without a resolvable product (no request is made)
    /// - `Error::OrderCreationFailed` / `Error::OrderCreationIncomplete` when creation fails
    /// - `Error::PaymentInitiationFailed`, `Error::PaymentCancelled`,
    ///   `Error::PaymentConfirmationFailed` on the online path; the cart is kept
    #[instrument(skip(self, shipping_address))]
    pub async fn checkout(
        &self,
        shipping_address: &str,
        payment_method: PaymentMethod,
    ) -> Result<CheckoutReceipt> {
        let started = self.inner.state.send_if_modified(|state| {
            if state.is_busy() {
                false
            } else {
                *state = CheckoutState::Validating;
                true
            }
        });
        if !started {
            return Err(Error::CheckoutInProgress);
        }

        let guard = RunGuard {
            state: &self.inner.state,
            settled: false,
        };
        match self.run(&guard, shipping_address, payment_method).await {
            Ok(receipt) => {
                info!(order_id = ?receipt.order_id, total = %receipt.total, "Checkout completed");
                guard.settle(CheckoutState::Completed(receipt.clone()));
                Ok(receipt)
            }
            Err(e) => {
                warn!(error = %e, "Checkout failed");
                guard.settle(CheckoutState::Failed {
                    reason: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        guard: &RunGuard<'_>,
        shipping_address: &str,
        payment_method: PaymentMethod,
    ) -> Result<CheckoutReceipt> {
        require_session(self.inner.gateway.session())?;
        let cart = self.inner.cart.snapshot();
        let payload = build_payload(&cart, shipping_address, payment_method)?;

        guard.advance(CheckoutState::Creating);
        let created = self.inner.orders.place(&payload).await?;

        match payment_method {
            PaymentMethod::CashOnDelivery => {
                self.clear_cart().await;
                Ok(CheckoutReceipt {
                    order_id: created.order_id,
                    total: created
                        .total_amount
                        .map_or_else(|| cart.grand_total(), Price::store),
                    payment_method,
                    payment_id: None,
                })
            }
            PaymentMethod::OnlinePayment => self.pay_online(guard, &cart, created).await,
        }
    }

    async fn pay_online(
        &self,
        guard: &RunGuard<'_>,
        cart: &CartSnapshot,
        created: CreatedOrder,
    ) -> Result<CheckoutReceipt> {
        let order_id = created
            .order_id
            .filter(OrderId::is_resolvable)
            .ok_or(Error::OrderCreationIncomplete)?;
        guard.advance(CheckoutState::AwaitingPayment { order_id });

        let amount = created.total_amount.map_or_else(
            || {
                warn!(%order_id, "Order response has no total, paying the local cart total");
                cart.grand_total()
            },
            Price::store,
        );
        let mut attempt = PaymentAttempt {
            order_id,
            amount,
            provider_order_id: None,
        };

        let description = format!("Order #{order_id}");
        let intent = self.inner.payments.initiate(&attempt, &description).await?;
        attempt.provider_order_id = Some(intent.provider_order_id.clone());

        let key = intent
            .key
            .clone()
            .or_else(|| self.inner.settings.payment_key.clone())
            .ok_or_else(|| {
                Error::PaymentInitiationFailed("no payment key configured".to_string())
            })?;
        let minor = match intent.amount {
            Some(minor) => minor,
            None => attempt.amount.minor_units().ok_or_else(|| {
                Error::PaymentInitiationFailed("amount out of range".to_string())
            })?,
        };

        let options = WidgetOptions {
            key,
            amount: minor,
            currency: attempt.amount.currency,
            order_id: intent.provider_order_id,
            name: self.inner.settings.store_name.clone(),
            description,
            prefill: prefill(self.inner.gateway.session().identity()),
            theme: Theme {
                color: self.inner.settings.theme_color.clone(),
            },
        };

        let payment = match self.inner.widget.open(options).await {
            WidgetOutcome::Completed(payment) => payment,
            WidgetOutcome::Failed { reason } => {
                info!(%order_id, %reason, "Payment widget closed without payment");
                return Err(Error::PaymentCancelled(reason));
            }
        };

        self.inner.payments.confirm(order_id, &payment).await?;
        self.clear_cart().await;

        Ok(CheckoutReceipt {
            order_id: Some(order_id),
            total: attempt.amount,
            payment_method: PaymentMethod::OnlinePayment,
            payment_id: Some(payment.payment_id),
        })
    }

    /// The order is final at this point; a failed clear must not fail it.
    async fn clear_cart(&self) {
        if let Err(e) = self.inner.cart.clear().await {
            warn!(error = %e, "Could not clear the cart after checkout, clearing locally");
            self.inner.cart.clear_local();
        }
    }
}

fn build_payload(
    cart: &CartSnapshot,
    shipping_address: &str,
    payment_method: PaymentMethod,
) -> Result<CheckoutPayload> {
    if cart.is_empty() {
        return Err(Error::Validation("Your cart is empty".to_string()));
    }
    let shipping_address = shipping_address.trim();
    if shipping_address.is_empty() {
        return Err(Error::Validation("Shipping address is required".to_string()));
    }
    if let Some(line) = cart.lines.iter().find(|line| !line.product.id.is_resolvable()) {
        return Err(Error::InvalidOrderData(format!(
            "Cart item \"{}\" has an invalid product id",
            line.product.name
        )));
    }

    Ok(CheckoutPayload {
        shipping_address: shipping_address.to_string(),
        payment_method,
        items: cart
            .lines
            .iter()
            .map(|line| CheckoutItem {
                product_id: line.product.id,
                quantity: line.quantity,
                price: line.product.price,
            })
            .collect(),
    })
}

fn prefill(identity: Option<Identity>) -> Prefill {
    identity.map_or_else(
        || Prefill {
            name: String::new(),
            email: String::new(),
        },
        |identity| Prefill {
            name: identity.username,
            email: identity.email.to_string(),
        },
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use electrokart_core::{CartLineId, OrderStatus, ProductId, Role};
    use reqwest::Method;
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::{CartLine, ProductRef};
    use crate::testing::{FakeBackend, ScriptedWidget};

    struct Fixture {
        backend: FakeBackend,
        cart: CartService,
        checkout: CheckoutService,
        widget: Arc<ScriptedWidget>,
    }

    async fn fixture(widget: ScriptedWidget) -> Fixture {
        let backend = FakeBackend::with_catalog();
        let (gateway, _) = backend.gateway();
        backend.sign_in(&gateway, "A", "a@b.com", Role::Customer);
        let cart = CartService::new(gateway.clone());
        cart.add(ProductId::new(42), 1).await.unwrap();
        let widget = Arc::new(widget);
        let checkout = CheckoutService::new(
            gateway,
            cart.clone(),
            Arc::clone(&widget) as Arc<dyn PaymentWidget>,
            WidgetSettings {
                payment_key: Some("rzp_test_local".to_string()),
                ..WidgetSettings::default()
            },
        );
        Fixture {
            backend,
            cart,
            checkout,
            widget,
        }
    }

    const PAYMENT_PATHS: [&str; 2] = ["/Payments/initiate", "/Payments/confirm"];

    #[tokio::test]
    async fn test_cash_on_delivery_clears_cart_without_payment() {
        let f = fixture(ScriptedWidget::completing()).await;

        let receipt = f
            .checkout
            .checkout("12 MG Road, Pune", PaymentMethod::CashOnDelivery)
            .await
            .unwrap();

        assert!(receipt.order_id.is_some());
        assert!(receipt.payment_id.is_none());
        assert!(f.cart.snapshot().is_empty());
        assert!(matches!(f.checkout.state(), CheckoutState::Completed(_)));
        for path in PAYMENT_PATHS {
            assert_eq!(f.backend.count(Method::POST, path), 0);
        }
        assert!(f.widget.opened().is_empty());
    }

    #[tokio::test]
    async fn test_empty_cart_never_reaches_network() {
        let f = fixture(ScriptedWidget::completing()).await;
        f.cart.clear().await.unwrap();

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::CashOnDelivery)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.backend.count(Method::POST, "/Orders/checkout"), 0);
        assert!(matches!(f.checkout.state(), CheckoutState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_blank_address_rejected() {
        let f = fixture(ScriptedWidget::completing()).await;

        let err = f
            .checkout
            .checkout("   ", PaymentMethod::CashOnDelivery)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.backend.count(Method::POST, "/Orders/checkout"), 0);
        assert!(!f.cart.snapshot().is_empty());
    }

    #[test]
    fn test_invalid_product_id_fails_fast() {
        let cart = CartSnapshot {
            lines: vec![CartLine {
                id: CartLineId::new(1),
                product: ProductRef {
                    id: ProductId::new(0),
                    name: "Ghost".to_string(),
                    price: Decimal::from(10),
                    image_url: None,
                },
                quantity: 1,
            }],
        };
        let err = build_payload(&cart, "12 MG Road", PaymentMethod::CashOnDelivery).unwrap_err();
        assert!(matches!(err, Error::InvalidOrderData(_)));
    }

    #[tokio::test]
    async fn test_online_payment_success() {
        let f = fixture(ScriptedWidget::completing()).await;

        let receipt = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap();

        assert!(receipt.payment_id.is_some());
        assert!(f.cart.snapshot().is_empty());
        let opened = f.widget.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].prefill.email, "a@b.com");
        assert_eq!(opened[0].amount, receipt.total.minor_units().unwrap());

        let order_id = receipt.order_id.unwrap();
        assert_eq!(
            f.backend.shop().order_status(order_id),
            Some(OrderStatus::Processing)
        );
    }

    #[tokio::test]
    async fn test_confirmation_failure_keeps_cart() {
        let f = fixture(ScriptedWidget::completing()).await;
        f.backend.shop().faults().confirm_fails = true;

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PaymentConfirmationFailed(_)));
        assert!(!f.cart.snapshot().is_empty());
        assert!(matches!(f.checkout.state(), CheckoutState::Failed { .. }));
        // Server keeps the order as it left it
        let orders = f.backend.shop().orders_for("a@b.com");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_widget_cancellation_keeps_cart() {
        let f = fixture(ScriptedWidget::failing("dismissed")).await;

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PaymentCancelled(_)));
        assert!(!f.cart.snapshot().is_empty());
        assert_eq!(f.backend.count(Method::POST, "/Payments/confirm"), 0);
    }

    #[tokio::test]
    async fn test_initiation_failure() {
        let f = fixture(ScriptedWidget::completing()).await;
        f.backend.shop().faults().initiate_fails = true;

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PaymentInitiationFailed(_)));
        assert!(f.widget.opened().is_empty());
        assert!(!f.cart.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_id_is_incomplete() {
        let f = fixture(ScriptedWidget::completing()).await;
        f.backend.shop().faults().omit_order_id = true;

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OrderCreationIncomplete));
        assert_eq!(f.backend.count(Method::POST, "/Payments/initiate"), 0);
    }

    #[tokio::test]
    async fn test_missing_total_falls_back_to_cart_total() {
        let f = fixture(ScriptedWidget::completing()).await;
        f.backend.shop().faults().omit_order_total = true;
        let expected = f.cart.snapshot().grand_total();

        let receipt = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap();

        assert_eq!(receipt.total, expected);
        let initiate = f.backend.last_body(Method::POST, "/Payments/initiate").unwrap();
        let amount: Decimal = serde_json::from_value(initiate["amount"].clone()).unwrap();
        assert!(initiate["amount"].is_number());
        assert_eq!(amount, expected.amount);
    }

    #[tokio::test]
    async fn test_second_checkout_rejected_while_busy() {
        let f = fixture(ScriptedWidget::completing().with_delay(Duration::from_millis(100))).await;
        let mut progress = f.checkout.subscribe();

        let first = {
            let checkout = f.checkout.clone();
            tokio::spawn(async move {
                checkout
                    .checkout("12 MG Road", PaymentMethod::OnlinePayment)
                    .await
            })
        };
        progress
            .wait_for(|state| matches!(state, CheckoutState::AwaitingPayment { .. }))
            .await
            .unwrap();

        let err = f
            .checkout
            .checkout("12 MG Road", PaymentMethod::OnlinePayment)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CheckoutInProgress));

        first.await.unwrap().unwrap();
        assert_eq!(f.backend.count(Method::POST, "/Orders/checkout"), 1);

        f.checkout.reset();
        assert_eq!(f.checkout.state(), CheckoutState::Idle);
    }
}
