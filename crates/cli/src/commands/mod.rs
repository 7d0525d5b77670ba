//! Subcommand implementations.
//!
//! Command output goes to stdout; diagnostics go through `tracing`.

pub mod account;
pub mod admin;
pub mod cart;
pub mod catalog;
pub mod orders;
pub mod wishlist;

use electrokart_storefront::Error;

/// Print one line of command output.
#[allow(clippy::print_stdout)]
pub fn say(line: impl std::fmt::Display) {
    println!("{line}");
}

/// Print the user-facing text for a failed command.
#[allow(clippy::print_stderr)]
pub fn print_error(error: &Error) {
    eprintln!("error: {}", error.user_message());
    if error.requires_login() {
        eprintln!("hint: run `ek login` first");
    }
}
