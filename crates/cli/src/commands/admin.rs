//! Store administration. Requires an admin session.

use electrokart_core::{OrderId, OrderStatus, Role, UserId};
use electrokart_storefront::{Result, Storefront};

use super::say;

pub async fn users(storefront: &Storefront) -> Result<()> {
    let users = storefront.admin().users().await?;
    for user in &users {
        say(format_args!(
            "#{:<5} {:<20} {:<32} {}",
            user.id, user.username, user.email, user.role
        ));
    }
    say(format_args!("{} account(s)", users.len()));
    Ok(())
}

pub async fn set_role(storefront: &Storefront, user: UserId, role: Role) -> Result<()> {
    storefront.admin().update_user_role(user, role).await?;
    say(format_args!("User #{user} is now {role}."));
    Ok(())
}

pub async fn delete_user(storefront: &Storefront, user: UserId) -> Result<()> {
    storefront.admin().delete_user(user).await?;
    say(format_args!("User #{user} deleted."));
    Ok(())
}

pub async fn orders(storefront: &Storefront) -> Result<()> {
    let orders = storefront.admin().all_orders().await?;
    for order in &orders {
        say(format_args!(
            "#{:<5} {}  {:<10} {:<14} {}",
            order.order_id,
            order.created_at.format("%Y-%m-%d %H:%M"),
            order.status,
            order.payment_method,
            order.display_total()
        ));
    }
    say(format_args!("{} order(s)", orders.len()));
    Ok(())
}

pub async fn set_status(storefront: &Storefront, order: OrderId, status: OrderStatus) -> Result<()> {
    storefront.admin().update_order_status(order, status).await?;
    say(format_args!("Order #{order} is now {status}."));
    Ok(())
}
