//! Payment widget for the terminal.
//!
//! There is no hosted checkout page in a terminal, so the shopper completes
//! the payment elsewhere (the provider's test dashboard, a payment link) and
//! pastes back the ids the provider issued.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use electrokart_storefront::services::{
    PaymentWidget, ProviderPayment, WidgetOptions, WidgetOutcome,
};

/// Reads the provider's payment id and signature from stdin.
///
/// An empty line at either prompt cancels the payment.
pub struct TerminalWidget {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalWidget {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for TerminalWidget {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::print_stderr)]
fn prompt(text: &str) {
    eprint!("{text}");
}

#[async_trait]
impl PaymentWidget for TerminalWidget {
    #[allow(clippy::print_stderr)]
    async fn open(&self, options: WidgetOptions) -> WidgetOutcome {
        let major = options.amount / options.currency.minor_per_major();
        let minor = options.amount % options.currency.minor_per_major();
        eprintln!();
        eprintln!("== {} ==", options.name);
        eprintln!("{}", options.description);
        eprintln!(
            "Amount:         {}{major}.{minor:02} {}",
            options.currency.symbol(),
            options.currency.code()
        );
        eprintln!("Provider order: {}", options.order_id);
        eprintln!("Merchant key:   {}", options.key);
        eprintln!("Paying as:      {} <{}>", options.prefill.name, options.prefill.email);
        eprintln!("Complete the payment, then paste the ids below (empty line cancels).");

        let mut input = self.input.lock().await;
        prompt("Payment id: ");
        let Some(payment_id) = read_value(&mut input).await else {
            return cancelled();
        };
        prompt("Signature:  ");
        let Some(signature) = read_value(&mut input).await else {
            return cancelled();
        };

        WidgetOutcome::Completed(ProviderPayment {
            payment_id,
            order_id: options.order_id,
            signature,
        })
    }
}

async fn read_value(input: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match input.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()).filter(|v| !v.is_empty()),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read from stdin");
            None
        }
    }
}

fn cancelled() -> WidgetOutcome {
    WidgetOutcome::Failed {
        reason: "Payment cancelled by user".to_string(),
    }
}
