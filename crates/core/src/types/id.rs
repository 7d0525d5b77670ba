//! Newtype IDs for server-assigned entity references.
//!
//! Every identifier the backend hands out is an integer. The `define_id!`
//! macro wraps each one in its own type so a cart line id can never be passed
//! where a product id is expected.

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `new()`, `as_i32()` and `is_resolvable()`
/// - `From<i32>`, `Into<i32>`, `Display` and `FromStr`
///
/// # Example
///
/// ```rust
/// # use electrokart_core::define_id;
/// define_id!(ReviewId);
/// define_id!(CouponId);
///
/// let review = ReviewId::new(1);
/// assert!(review.is_resolvable());
/// assert!(!CouponId::new(0).is_resolvable());
///
/// // These are different types, so this won't compile:
/// // let _: ReviewId = CouponId::new(1);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }

            /// Whether the id can refer to a server entity.
            ///
            /// The backend assigns ids starting at 1; zero and negative values
            /// come from missing or defaulted fields.
            #[must_use]
            pub const fn is_resolvable(&self) -> bool {
                self.0 > 0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = ::core::num::ParseIntError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                s.trim().parse::<i32>().map(Self)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(UserId);
define_id!(ProductId);
define_id!(CartLineId);
define_id!(WishlistEntryId);
define_id!(OrderId);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolvable_ids() {
        assert!(ProductId::new(42).is_resolvable());
        assert!(!ProductId::new(0).is_resolvable());
        assert!(!ProductId::new(-3).is_resolvable());
    }

    #[test]
    fn test_parse_trims_input() {
        let id: CartLineId = " 7 ".parse().unwrap();
        assert_eq!(id, CartLineId::new(7));
        assert!("seven".parse::<CartLineId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&OrderId::new(99)).unwrap();
        assert_eq!(json, "99");
        let id: OrderId = serde_json::from_str("99").unwrap();
        assert_eq!(id.as_i32(), 99);
    }
}
