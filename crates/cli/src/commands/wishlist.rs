//! Wishlist commands.

use electrokart_core::{Price, ProductId};
use electrokart_storefront::{Result, Storefront};

use super::say;

pub async fn show(storefront: &Storefront) -> Result<()> {
    let wishlist = storefront.wishlist();
    wishlist.fetch().await?;
    let snapshot = wishlist.snapshot();
    if snapshot.is_empty() {
        say("Your wishlist is empty.");
        return Ok(());
    }
    for entry in &snapshot.entries {
        say(format_args!(
            "#{:<5} {:<32} {:>12}",
            entry.product.id,
            entry.product.name,
            Price::store(entry.product.price).to_string()
        ));
    }
    Ok(())
}

pub async fn add(storefront: &Storefront, product: ProductId) -> Result<()> {
    let wishlist = storefront.wishlist();
    wishlist.fetch().await?;
    wishlist.add(product).await?;
    say("Saved to wishlist.");
    Ok(())
}

pub async fn remove(storefront: &Storefront, product: ProductId) -> Result<()> {
    storefront.wishlist().remove(product).await?;
    say("Removed from wishlist.");
    Ok(())
}

pub async fn clear(storefront: &Storefront) -> Result<()> {
    storefront.wishlist().clear_remote().await?;
    say("Wishlist cleared.");
    Ok(())
}
