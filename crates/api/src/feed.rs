//! Price feed client for batched collateral quotes.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::types::{AssetId, PriceQuote};

/// Errors surfaced by the price feed.
///
/// `RateLimited` is the only variant the poller treats as
/// retry-within-the-tick; everything else counts toward the
/// consecutive-failure suspension budget.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed rate limited (HTTP 429)")]
    RateLimited,

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("feed transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed response decode error: {0}")]
    Decode(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Upstream quote source. One request covers at most the feed's batch limit
/// of identifiers; batching is the caller's concern.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch current USD quotes for a batch of assets. Assets the feed does
    /// not know are simply absent from the result.
    async fn quotes(&self, assets: &[AssetId]) -> FeedResult<Vec<PriceQuote>>;

    /// Current base-asset price in USD, used to convert feed quotes into
    /// base units per token.
    async fn reference_price(&self) -> FeedResult<f64>;
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteEntry {
    /// Served as a string to preserve precision.
    price: String,
    #[serde(default)]
    block: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteResponse {
    data: HashMap<String, QuoteEntry>,
}

/// HTTP price feed client.
#[derive(Debug, Clone)]
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
    reference_asset: AssetId,
}

impl HttpPriceFeed {
    /// Create a feed client against the given endpoint. `reference_asset`
    /// is the base-asset mint whose USD quote serves as the conversion rate.
    pub fn new(base_url: impl Into<String>, reference_asset: AssetId) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            reference_asset,
        }
    }

    async fn fetch(&self, assets: &[AssetId]) -> FeedResult<QuoteResponse> {
        let ids = assets
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/price?ids={}", self.base_url, ids);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited);
        }
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        response
            .json::<QuoteResponse>()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    #[instrument(skip(self, assets), fields(count = assets.len()))]
    async fn quotes(&self, assets: &[AssetId]) -> FeedResult<Vec<PriceQuote>> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.fetch(assets).await?;
        let fetched_at = Utc::now();

        let mut quotes = Vec::with_capacity(body.data.len());
        for (id, entry) in body.data {
            let price_usd: f64 = entry
                .price
                .parse()
                .map_err(|_| FeedError::Decode(format!("bad price for {id}: {}", entry.price)))?;
            quotes.push(PriceQuote {
                asset: AssetId::new(id),
                price_usd,
                sequence: entry.block,
                fetched_at,
            });
        }

        debug!(returned = quotes.len(), "fetched quote batch");
        Ok(quotes)
    }

    #[instrument(skip(self))]
    async fn reference_price(&self) -> FeedResult<f64> {
        let body = self.fetch(std::slice::from_ref(&self.reference_asset)).await?;

        let entry = body
            .data
            .get(self.reference_asset.as_str())
            .ok_or_else(|| {
                FeedError::Decode(format!("missing reference asset {}", self.reference_asset))
            })?;

        entry
            .price
            .parse()
            .map_err(|_| FeedError::Decode(format!("bad reference price: {}", entry.price)))
    }
}
