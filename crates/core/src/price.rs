//! Fixed-point price helpers.
//!
//! Prices are `u64` base units per whole token at 1e9 scale. The feed
//! quotes in USD; the base/USD reference price converts between the two.

/// Fixed-point scale: 1.0 in base units.
pub const PRICE_SCALE: u64 = 1_000_000_000;

/// Convert a USD quote into fixed-point base units per token through the
/// base-asset/USD reference price. Returns `None` for unusable inputs
/// (unknown reference, non-finite or non-positive quotes, dust that rounds
/// to zero) so callers never store a zero price they would then evaluate.
pub fn usd_to_base(price_usd: f64, reference_usd: f64) -> Option<u64> {
    if !price_usd.is_finite() || !reference_usd.is_finite() {
        return None;
    }
    if price_usd <= 0.0 || reference_usd <= 0.0 {
        return None;
    }

    let base = price_usd / reference_usd * PRICE_SCALE as f64;
    if !base.is_finite() || base < 1.0 || base >= u64::MAX as f64 {
        return None;
    }
    Some(base as u64)
}

/// Drop from entry to current in basis points; 0 when the price has not
/// dropped.
pub fn drop_bps(entry: u64, current: u64) -> u32 {
    if entry == 0 || current >= entry {
        return 0;
    }
    (((entry - current) as u128 * 10_000) / entry as u128) as u32
}

/// Drop from entry to current as a percentage.
pub fn drop_pct(entry: u64, current: u64) -> f64 {
    drop_bps(entry, current) as f64 / 100.0
}
