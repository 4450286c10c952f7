//! Error taxonomies that are part of the engine's public contract.
//!
//! Internal glue (adapter plumbing, orchestration) keeps using `anyhow`, the
//! way the rest of this codebase does. These enums exist because the reason
//! codes need to be stable, inspectable values rather than opaque error
//! strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason a [`crate::risk::RiskGate`] denied or adjusted an opportunity.
///
/// Never constructed outside `risk::RiskGate::evaluate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskReason {
    RiskOk,
    RiskEdge,
    RiskSlippage,
    RiskStale,
    RiskExposure,
    RiskDailyLoss,
    RiskUnknown,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskReason::RiskOk => "RISK_OK",
            RiskReason::RiskEdge => "RISK_EDGE",
            RiskReason::RiskSlippage => "RISK_SLIPPAGE",
            RiskReason::RiskStale => "RISK_STALE",
            RiskReason::RiskExposure => "RISK_EXPOSURE",
            RiskReason::RiskDailyLoss => "RISK_DAILY_LOSS",
            RiskReason::RiskUnknown => "RISK_UNKNOWN",
        }
    }
}

impl std::fmt::Display for RiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a venue adapter call can fail with, distinguishing retryable
/// transport failures from terminal semantic rejections.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("venue returned server error: {0}")]
    ServerError(String),
    #[error("order rejected: {0}")]
    OrderRejected(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("market not open")]
    MarketNotOpen,
}

impl VenueError {
    /// Retryable transport failures get exponential backoff; semantic
    /// rejections fail the leg immediately and trigger rollback.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::ConnectionDropped(_) | VenueError::Timeout(_) | VenueError::ServerError(_)
        )
    }
}

/// Fatal at startup: an `EngineConfig` value failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: String,
    },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: String },
    #[error("failed to parse {field}: {source}")]
    Parse {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Top-level error surfaced by the orchestrator-facing adapter functions
/// (`scan`, `execute`). Internal glue stays `anyhow`; this is the boundary
/// where a caller needs to match on kind.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("configuration invalid: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
