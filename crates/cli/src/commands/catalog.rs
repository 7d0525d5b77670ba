//! Catalog commands.

use electrokart_core::{Price, ProductId};
use electrokart_storefront::models::Product;
use electrokart_storefront::{Result, Storefront};

use super::say;

pub async fn list(storefront: &Storefront, category: Option<&str>) -> Result<()> {
    let products = match category {
        Some(category) => storefront.catalog().by_category(category).await?,
        None => storefront.catalog().products().await?,
    };
    if products.is_empty() {
        say("No products found.");
        return Ok(());
    }
    for product in &products {
        say(summary_line(product));
    }
    Ok(())
}

pub async fn show(storefront: &Storefront, id: ProductId) -> Result<()> {
    let product = storefront.catalog().product(id).await?;
    say(summary_line(&product));
    if let Some(brand) = &product.brand {
        say(format_args!("  Brand:    {brand}"));
    }
    if let Some(category) = &product.category {
        say(format_args!("  Category: {category}"));
    }
    if let Some(description) = &product.description {
        say(format_args!("  {description}"));
    }
    Ok(())
}

fn summary_line(product: &Product) -> String {
    let stock = if product.in_stock() { "" } else { "  (out of stock)" };
    format!(
        "#{:<5} {:<32} {:>12}{stock}",
        product.id,
        product.name,
        Price::store(product.price).to_string()
    )
}
