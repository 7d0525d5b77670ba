//! Decimal prices in the store's single supported currency.

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Currencies the payment provider accepts for this store.
///
/// The store trades in exactly one currency; the enum exists so the code
/// and the wire format name it explicitly instead of passing bare strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    INR,
}

impl Currency {
    /// ISO 4217 code sent to the payment endpoints.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::INR => "INR",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::INR => "₹",
        }
    }

    /// Minor units per major unit (paise per rupee).
    #[must_use]
    pub const fn minor_per_major(self) -> i64 {
        match self {
            Self::INR => 100,
        }
    }
}

/// An amount of money in a [`Currency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in major units (rupees, not paise).
    pub amount: Decimal,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// A price in the store currency.
    #[must_use]
    pub fn store(amount: Decimal) -> Self {
        Self::new(amount, Currency::default())
    }

    /// Amount in minor units, rounded half away from zero.
    ///
    /// Returns `None` if the amount does not fit in an `i64`.
    #[must_use]
    pub fn minor_units(&self) -> Option<i64> {
        let minor = self.amount * Decimal::from(self.currency.minor_per_major());
        minor
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:.2}", self.currency.symbol(), self.amount)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_minor_units_rounds_to_paise() {
        let price = Price::store(Decimal::from_str("499.995").unwrap());
        assert_eq!(price.minor_units(), Some(50_000));

        let price = Price::store(Decimal::from(500));
        assert_eq!(price.minor_units(), Some(50_000));
    }

    #[test]
    fn test_display() {
        let price = Price::store(Decimal::from_str("1299.5").unwrap());
        assert_eq!(price.to_string(), "₹1299.50");
    }

    #[test]
    fn test_currency_code() {
        assert_eq!(Currency::default().code(), "INR");
        assert_eq!(serde_json::to_string(&Currency::INR).unwrap(), "\"INR\"");
    }
}
