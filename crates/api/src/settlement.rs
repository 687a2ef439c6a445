//! Settlement client for the opaque "liquidate position" operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::types::{AccountId, PositionId};

/// Why a position liquidated: the trigger price was crossed, or the loan
/// term expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationReason {
    Price,
    Time,
}

/// Successful settlement results. `AlreadyLiquidated` is a success: the
/// settlement path detects replays of ambiguous earlier attempts itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Liquidated { reason: LiquidationReason },
    AlreadyLiquidated,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    /// The settlement path refused the liquidation (loan repaid, not
    /// liquidatable, paused). Retrying will not change the answer.
    #[error("liquidation rejected: {code}")]
    Rejected { code: String },

    #[error("settlement unavailable: HTTP {0}")]
    Unavailable(u16),

    #[error("settlement transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("settlement response decode error: {0}")]
    Decode(String),
}

impl SettlementError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// The external liquidation operation.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn liquidate(
        &self,
        position: &PositionId,
        caller: &AccountId,
    ) -> Result<SettlementOutcome, SettlementError>;
}

#[derive(Debug, Serialize)]
struct LiquidateRequest<'a> {
    position: &'a PositionId,
    caller: &'a AccountId,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    error: String,
}

/// HTTP client for the settlement service.
#[derive(Debug, Clone)]
pub struct HttpSettlement {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettlement {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Settlement for HttpSettlement {
    #[instrument(skip(self), fields(position = %position))]
    async fn liquidate(
        &self,
        position: &PositionId,
        caller: &AccountId,
    ) -> Result<SettlementOutcome, SettlementError> {
        let url = format!("{}/liquidate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&LiquidateRequest { position, caller })
            .send()
            .await?;
        let status = response.status();

        if status.is_client_error() {
            let code = match response.json::<RejectionBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            warn!(position = %position, code = %code, "settlement rejected liquidation");
            return Err(SettlementError::Rejected { code });
        }
        if !status.is_success() {
            return Err(SettlementError::Unavailable(status.as_u16()));
        }

        response
            .json::<SettlementOutcome>()
            .await
            .map_err(|e| SettlementError::Decode(e.to_string()))
    }
}
