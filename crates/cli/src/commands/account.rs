//! Account commands: register, login, logout, whoami.

use secrecy::SecretString;
use tracing::info;

use electrokart_storefront::{Result, Storefront};

use super::say;

pub async fn register(
    storefront: &Storefront,
    username: &str,
    email: &str,
    password: String,
) -> Result<()> {
    let password = SecretString::from(password);
    storefront.auth().register(username, email, &password).await?;
    info!(%email, "Account created");
    say("Account created. Run `ek login` to sign in.");
    Ok(())
}

pub async fn login(storefront: &Storefront, email: &str, password: String) -> Result<()> {
    let password = SecretString::from(password);
    let identity = storefront.auth().login(email, &password).await?;
    say(format_args!(
        "Signed in as {} <{}>",
        identity.username, identity.email
    ));

    // Warm the aggregates so the first listing is accurate
    if let Err(e) = storefront.sync().await {
        tracing::warn!(error = %e, "Could not load cart and wishlist after login");
    }
    let count = storefront.cart().item_count();
    if count > 0 {
        say(format_args!("{count} item(s) waiting in your cart"));
    }
    Ok(())
}

pub async fn logout(storefront: &Storefront) {
    if !storefront.session().is_authenticated() {
        say("Not signed in.");
        return;
    }
    storefront.logout().await;
    say("Signed out.");
}

pub fn whoami(storefront: &Storefront) {
    match storefront.session().identity() {
        Some(identity) => say(format_args!(
            "{} <{}> ({})",
            identity.username, identity.email, identity.role
        )),
        None => say("Not signed in."),
    }
}
