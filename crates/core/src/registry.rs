//! In-memory table of tracked assets and their liquidation thresholds.
//!
//! Single source of truth for the poller and detector. Process-local state:
//! rebuilt at startup from the active-positions source, incrementally
//! updated afterward. Never treated as sufficient to prevent duplicate
//! execution; that is the lock manager's job.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use sentinel_api::{AccountId, AssetId, PositionId};

/// Per-asset threshold set. Almost always a handful of entries.
pub type ThresholdSet = SmallVec<[LiquidationThreshold; 4]>;

/// Price at or below which a position must be liquidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationThreshold {
    pub position: PositionId,
    pub owner: AccountId,
    /// Fixed-point base units per token.
    pub trigger_price: u64,
    /// Price when the position opened; informational, for drop reporting.
    pub entry_price: u64,
    /// Base units borrowed.
    pub principal: u64,
}

/// A tracked collateral asset. Created on first registration or an explicit
/// track call; never deleted, since an asset with zero thresholds stays
/// tracked.
#[derive(Debug, Clone)]
pub struct MonitoredAsset {
    pub asset: AssetId,
    /// Fixed-point base units per token; 0 until the first quote lands.
    pub last_price: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub thresholds: ThresholdSet,
}

impl MonitoredAsset {
    fn new(asset: AssetId) -> Self {
        Self {
            asset,
            last_price: 0,
            updated_at: None,
            thresholds: ThresholdSet::new(),
        }
    }
}

/// Result of a threshold registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Newly registered; carries the asset's current price so the caller
    /// can evaluate the threshold immediately.
    Registered { last_price: u64 },
    /// This position already has a threshold under this asset.
    Duplicate,
}

/// Registry totals.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub asset_count: usize,
    pub threshold_count: usize,
}

/// Read-only per-asset snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct AssetStatus {
    pub asset: AssetId,
    pub last_price: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub threshold_count: usize,
}

#[derive(Debug, Default)]
pub struct MonitorRegistry {
    assets: DashMap<AssetId, MonitoredAsset>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an asset. Idempotent.
    pub fn track(&self, asset: &AssetId) {
        self.assets
            .entry(asset.clone())
            .or_insert_with(|| MonitoredAsset::new(asset.clone()));
    }

    pub fn is_tracked(&self, asset: &AssetId) -> bool {
        self.assets.contains_key(asset)
    }

    /// Register a threshold, tracking the asset if needed. Idempotent per
    /// position id: a duplicate is a logged no-op.
    pub fn register(&self, asset: &AssetId, threshold: LiquidationThreshold) -> RegisterOutcome {
        let mut entry = self
            .assets
            .entry(asset.clone())
            .or_insert_with(|| MonitoredAsset::new(asset.clone()));

        if entry
            .thresholds
            .iter()
            .any(|t| t.position == threshold.position)
        {
            debug!(
                asset = %asset,
                position = %threshold.position,
                "threshold already registered, ignoring"
            );
            return RegisterOutcome::Duplicate;
        }

        entry.thresholds.push(threshold);
        RegisterOutcome::Registered {
            last_price: entry.last_price,
        }
    }

    /// Remove a position's threshold. No-op when absent.
    pub fn remove_threshold(&self, asset: &AssetId, position: &PositionId) -> bool {
        let Some(mut entry) = self.assets.get_mut(asset) else {
            return false;
        };

        let before = entry.thresholds.len();
        entry.thresholds.retain(|t| &t.position != position);
        let removed = entry.thresholds.len() < before;

        if removed {
            debug!(asset = %asset, position = %position, "threshold removed");
        }
        removed
    }

    /// Record a fresh quote and return the threshold snapshot to evaluate
    /// against it. Quotes for untracked assets are ignored.
    pub fn update_price(&self, asset: &AssetId, price: u64, at: DateTime<Utc>) -> ThresholdSet {
        match self.assets.get_mut(asset) {
            Some(mut entry) => {
                entry.last_price = price;
                entry.updated_at = Some(at);
                entry.thresholds.clone()
            }
            None => ThresholdSet::new(),
        }
    }

    pub fn price(&self, asset: &AssetId) -> Option<u64> {
        self.assets.get(asset).map(|a| a.last_price)
    }

    pub fn tracked_assets(&self) -> Vec<AssetId> {
        self.assets.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut threshold_count = 0;
        for entry in self.assets.iter() {
            threshold_count += entry.thresholds.len();
        }
        RegistryStats {
            asset_count: self.assets.len(),
            threshold_count,
        }
    }

    pub fn asset_statuses(&self) -> Vec<AssetStatus> {
        self.assets
            .iter()
            .map(|e| AssetStatus {
                asset: e.asset.clone(),
                last_price: e.last_price,
                updated_at: e.updated_at,
                threshold_count: e.thresholds.len(),
            })
            .collect()
    }
}
