//! Checkout and order history.

use electrokart_core::PaymentMethod;
use electrokart_storefront::{Result, Storefront};
use tracing::debug;

use super::say;

pub async fn checkout(storefront: &Storefront, address: &str, method: PaymentMethod) -> Result<()> {
    // Checkout works from the local cart, so load it first
    storefront.cart().fetch().await?;

    let mut progress = storefront.checkout().subscribe();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            debug!(?state, "Checkout progressed");
            if state.is_terminal() {
                break;
            }
        }
    });

    let result = storefront.checkout().checkout(address, method).await;
    watcher.abort();
    let receipt = result?;

    match receipt.order_id {
        Some(id) => say(format_args!("Order #{id} placed, total {}", receipt.total)),
        None => say(format_args!("Order placed, total {}", receipt.total)),
    }
    if let Some(payment_id) = receipt.payment_id {
        say(format_args!("Payment {payment_id} confirmed."));
    } else {
        say("Pay on delivery.");
    }
    storefront.checkout().reset();
    Ok(())
}

pub async fn list(storefront: &Storefront) -> Result<()> {
    let orders = storefront.orders().my_orders().await?;
    if orders.is_empty() {
        say("No orders yet.");
        return Ok(());
    }
    for order in &orders {
        say(format_args!(
            "#{:<5} {}  {:<10} {:<14} {}",
            order.order_id,
            order.created_at.format("%Y-%m-%d"),
            order.status,
            order.payment_method,
            order.display_total()
        ));
    }
    Ok(())
}
