//! ElectroKart CLI - shop from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (the session persists in ELECTROKART_STATE_DIR)
//! ek login -e asha@example.com -p secret1
//!
//! # Browse and fill the cart
//! ek products --category "Smart Home"
//! ek cart add 42 --quantity 2
//!
//! # Place an order paid online
//! ek checkout --address "12 MG Road, Pune" --payment online
//!
//! # Admin
//! ek admin set-status 17 shipped
//! ```
//!
//! # Environment Variables
//!
//! See `electrokart_storefront::config` for the client settings. `SENTRY_DSN`
//! additionally enables error reporting.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use electrokart_core::{CartLineId, OrderId, OrderStatus, PaymentMethod, ProductId, Role, UserId};
use electrokart_storefront::{ClientConfig, Storefront};

mod commands;
mod widget;

use widget::TerminalWidget;

#[derive(Parser)]
#[command(name = "ek")]
#[command(author, version, about = "ElectroKart storefront in the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "EK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign in and persist the session
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "EK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the session
    Logout,
    /// Show the signed-in account
    Whoami,
    /// List products
    Products {
        /// Only products in this category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Show one product
    Product { id: ProductId },
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Manage the wishlist
    Wishlist {
        #[command(subcommand)]
        action: WishlistAction,
    },
    /// Place an order for the current cart
    Checkout {
        /// Shipping address
        #[arg(short, long)]
        address: String,

        /// `cod` or `online`
        #[arg(short, long, default_value = "cod")]
        payment: PaymentMethod,
    },
    /// List your orders
    Orders,
    /// Store administration
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show the cart
    Show,
    /// Add a product
    Add {
        product: ProductId,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Change a line's quantity (below 1 removes it)
    Update {
        line: CartLineId,

        #[arg(allow_negative_numbers = true)]
        quantity: i32,
    },
    /// Remove a line
    Remove { line: CartLineId },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum WishlistAction {
    /// Show the wishlist
    Show,
    /// Save a product
    Add { product: ProductId },
    /// Drop a product
    Remove { product: ProductId },
    /// Empty the wishlist
    Clear,
}

#[derive(Subcommand)]
enum AdminAction {
    /// List accounts
    Users,
    /// Change an account's role (`customer`, `admin`)
    SetRole { user: UserId, role: Role },
    /// Delete an account
    DeleteUser { user: UserId },
    /// List every order
    Orders,
    /// Move an order to a new status
    SetStatus { order: OrderId, status: OrderStatus },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN")
        .ok()
        .filter(|dsn| !dsn.trim().is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(with_sentry: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "electrokart_cli=info,electrokart_storefront=info".into());

    // Logs go to stderr so command output stays pipeable
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let sentry_layer =
        with_sentry.then(|| sentry_tracing::layer().event_filter(sentry_event_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(sentry_layer)
        .init();
}

fn main() {
    let _ = dotenvy::dotenv();

    // Sentry must be initialized before the runtime and the subscriber
    let sentry_guard = init_sentry();
    init_tracing(sentry_guard.is_some());

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        tracing::error!(error = %e, "Command failed");
        commands::print_error(&e);
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> electrokart_storefront::Result<()> {
    let config = ClientConfig::from_env()?;
    let storefront = Storefront::connect(&config, Arc::new(TerminalWidget::new()))?;

    match cli.command {
        Commands::Register {
            username,
            email,
            password,
        } => commands::account::register(&storefront, &username, &email, password).await,
        Commands::Login { email, password } => {
            commands::account::login(&storefront, &email, password).await
        }
        Commands::Logout => {
            commands::account::logout(&storefront).await;
            Ok(())
        }
        Commands::Whoami => {
            commands::account::whoami(&storefront);
            Ok(())
        }
        Commands::Products { category } => {
            commands::catalog::list(&storefront, category.as_deref()).await
        }
        Commands::Product { id } => commands::catalog::show(&storefront, id).await,
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&storefront).await,
            CartAction::Add { product, quantity } => {
                commands::cart::add(&storefront, product, quantity).await
            }
            CartAction::Update { line, quantity } => {
                commands::cart::update(&storefront, line, quantity).await
            }
            CartAction::Remove { line } => commands::cart::remove(&storefront, line).await,
            CartAction::Clear => commands::cart::clear(&storefront).await,
        },
        Commands::Wishlist { action } => match action {
            WishlistAction::Show => commands::wishlist::show(&storefront).await,
            WishlistAction::Add { product } => commands::wishlist::add(&storefront, product).await,
            WishlistAction::Remove { product } => {
                commands::wishlist::remove(&storefront, product).await
            }
            WishlistAction::Clear => commands::wishlist::clear(&storefront).await,
        },
        Commands::Checkout { address, payment } => {
            commands::orders::checkout(&storefront, &address, payment).await
        }
        Commands::Orders => commands::orders::list(&storefront).await,
        Commands::Admin { action } => match action {
            AdminAction::Users => commands::admin::users(&storefront).await,
            AdminAction::SetRole { user, role } => {
                commands::admin::set_role(&storefront, user, role).await
            }
            AdminAction::DeleteUser { user } => commands::admin::delete_user(&storefront, user).await,
            AdminAction::Orders => commands::admin::orders(&storefront).await,
            AdminAction::SetStatus { order, status } => {
                commands::admin::set_status(&storefront, order, status).await
            }
        },
    }
}
