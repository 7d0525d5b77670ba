//! Cart commands.

use electrokart_core::{CartLineId, Price, ProductId};
use electrokart_storefront::{Result, Storefront};

use super::say;

pub async fn show(storefront: &Storefront) -> Result<()> {
    let cart = storefront.cart();
    cart.fetch().await?;
    let snapshot = cart.snapshot();
    if snapshot.is_empty() {
        say("Your cart is empty.");
        return Ok(());
    }
    for line in &snapshot.lines {
        say(format_args!(
            "[{}] {} x{} @ {} = {}",
            line.id,
            line.product.name,
            line.quantity,
            Price::store(line.product.price),
            Price::store(line.line_total())
        ));
    }
    say(format_args!(
        "{} item(s), total {}",
        snapshot.item_count(),
        snapshot.grand_total()
    ));
    Ok(())
}

pub async fn add(storefront: &Storefront, product: ProductId, quantity: u32) -> Result<()> {
    storefront.cart().add(product, quantity).await?;
    say(format_args!(
        "Added to cart. {} item(s) in cart.",
        storefront.cart().item_count()
    ));
    Ok(())
}

pub async fn update(storefront: &Storefront, line: CartLineId, quantity: i32) -> Result<()> {
    let cart = storefront.cart();
    // The line must be known locally before it can be patched
    cart.fetch().await?;
    cart.update_quantity(line, quantity).await?;
    if quantity < 1 {
        say("Removed from cart.");
    } else {
        say("Cart updated.");
    }
    Ok(())
}

pub async fn remove(storefront: &Storefront, line: CartLineId) -> Result<()> {
    storefront.cart().remove(line).await?;
    say("Removed from cart.");
    Ok(())
}

pub async fn clear(storefront: &Storefront) -> Result<()> {
    storefront.cart().clear().await?;
    say("Cart cleared.");
    Ok(())
}
