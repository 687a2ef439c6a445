//! Identifier newtypes and wire-level data shared across contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Collateral token identifier (mint address).
    AssetId
);

id_type!(
    /// Open loan identifier.
    PositionId
);

id_type!(
    /// Borrower account identifier.
    AccountId
);

/// A single quote returned by the price feed. Transient: consumed by the
/// registry on the tick that fetched it, never persisted.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub asset: AssetId,
    /// Quote in USD per whole token, as served by the feed.
    pub price_usd: f64,
    /// Optional block/sequence marker from the feed.
    pub sequence: Option<u64>,
    pub fetched_at: DateTime<Utc>,
}

/// An open position as served by the active-positions source. Prices and
/// principal are fixed-point base units (1e9 scale).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePosition {
    pub position: PositionId,
    pub owner: AccountId,
    pub asset: AssetId,
    pub trigger_price: u64,
    pub entry_price: u64,
    pub principal: u64,
}
