//! Pure breach evaluation.
//!
//! Decides which registered thresholds a fresh price crosses. Mutates
//! nothing: threshold removal happens only after the executor confirms a
//! successful liquidation.

use sentinel_api::{AccountId, AssetId, PositionId};

use crate::price;
use crate::registry::LiquidationThreshold;

/// A threshold crossed by an observed price.
#[derive(Debug, Clone)]
pub struct Breach {
    pub asset: AssetId,
    pub position: PositionId,
    pub owner: AccountId,
    pub trigger_price: u64,
    pub entry_price: u64,
    pub principal: u64,
    pub observed_price: u64,
    /// Drop from entry to observed, for reporting.
    pub drop_pct: f64,
}

/// Evaluate an asset's thresholds against a fresh price. A zero price is
/// never evaluated. Each crossed threshold produces one breach; callers
/// hand them off independently.
pub fn evaluate(
    asset: &AssetId,
    price: u64,
    thresholds: &[LiquidationThreshold],
) -> Vec<Breach> {
    if price == 0 {
        return Vec::new();
    }

    thresholds
        .iter()
        .filter(|t| price <= t.trigger_price)
        .map(|t| Breach {
            asset: asset.clone(),
            position: t.position.clone(),
            owner: t.owner.clone(),
            trigger_price: t.trigger_price,
            entry_price: t.entry_price,
            principal: t.principal,
            observed_price: price,
            drop_pct: price::drop_pct(t.entry_price, price),
        })
        .collect()
}
