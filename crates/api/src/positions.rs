//! Active-positions source for the startup registry rebuild.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::types::ActivePosition;

/// Source of currently open positions. The registry is process-local state;
/// it is rebuilt from this source once at startup and kept incrementally
/// updated afterward by the owning system.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn active_positions(&self) -> Result<Vec<ActivePosition>>;
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    positions: Vec<ActivePosition>,
}

/// HTTP client for the loan-book service.
#[derive(Debug, Clone)]
pub struct HttpPositionSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPositionSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PositionSource for HttpPositionSource {
    #[instrument(skip(self))]
    async fn active_positions(&self) -> Result<Vec<ActivePosition>> {
        let url = format!("{}/positions/active", self.base_url);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: PositionsResponse = response.json().await?;

        info!(count = body.positions.len(), "fetched active positions");
        Ok(body.positions)
    }
}
