//! Engine configuration, loaded once and passed by value/Arc.
//!
//! Follows the `Config::from_env` / `BookStoreConfig::from_env` pattern: each
//! field reads an environment variable with a typed fallback to a sane
//! default, and the whole thing validates on construction so a bad value is
//! fatal at startup rather than discovered mid-run.

use crate::error::ConfigError;
use std::env;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_edge_bps_net_hard: i64,
    pub max_snapshot_age_ms: i64,
    pub max_slippage_bps_hard_per_leg: i64,
    pub max_position_contracts: i64,
    pub max_capital_per_trade: f64,
    pub max_position_fraction: f64,
    pub fee_buffer_bps: i64,
    pub probe_quantity_contracts: i64,
    pub ttl_ms_default: i64,
    pub max_execution_time_ms: i64,
    pub hybrid_fallback_timeout_ms: i64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_jitter_pct: f64,
    pub order_submission_delay_ms: u64,
    /// Tolerance, in contracts, for per-outcome allocation sizes in a
    /// categorical rebalance to differ from strictly equal. Default 0 means
    /// strict equality.
    pub rebalance_size_tolerance_contracts: i64,
    pub dependency_confidence_floor: f64,
    /// Tag stamped onto every Opportunity/RiskDecision/MultiLegTrade a run
    /// produces so a consumer can tell which sizing and risk rules generated
    /// a stored record after this crate changes.
    pub strategy_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_edge_bps_net_hard: 100,
            max_snapshot_age_ms: 750,
            max_slippage_bps_hard_per_leg: 100,
            max_position_contracts: 100,
            max_capital_per_trade: 0.10,
            max_position_fraction: 0.25,
            fee_buffer_bps: 10,
            probe_quantity_contracts: 25,
            ttl_ms_default: 500,
            max_execution_time_ms: 30,
            hybrid_fallback_timeout_ms: 15,
            max_retries: 3,
            retry_base_delay_ms: 50,
            retry_jitter_pct: 0.20,
            order_submission_delay_ms: 0,
            rebalance_size_tolerance_contracts: 0,
            dependency_confidence_floor: 0.6,
            strategy_version: "1.0.0".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|source| ConfigError::Parse { field: key, source }),
        Err(_) => Ok(default),
    }
}

fn env_parse_f64(key: &'static str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Build from environment variables, falling back to documented defaults.
    /// Returns `Err` if any value is present but malformed, or violates a
    /// range invariant — configuration is fatal at startup, never silently
    /// clamped.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let cfg = Self {
            min_edge_bps_net_hard: env_parse("ARB_MIN_EDGE_BPS_NET_HARD", 100)?,
            max_snapshot_age_ms: env_parse("ARB_MAX_SNAPSHOT_AGE_MS", 750)?,
            max_slippage_bps_hard_per_leg: env_parse("ARB_MAX_SLIPPAGE_BPS_HARD_PER_LEG", 100)?,
            max_position_contracts: env_parse("ARB_MAX_POSITION_CONTRACTS", 100)?,
            max_capital_per_trade: env_parse_f64("ARB_MAX_CAPITAL_PER_TRADE", 0.10),
            max_position_fraction: env_parse_f64("ARB_MAX_POSITION_FRACTION", 0.25),
            fee_buffer_bps: env_parse("ARB_FEE_BUFFER_BPS", 10)?,
            probe_quantity_contracts: env_parse("ARB_PROBE_QUANTITY_CONTRACTS", 25)?,
            ttl_ms_default: env_parse("ARB_TTL_MS_DEFAULT", 500)?,
            max_execution_time_ms: env_parse("ARB_MAX_EXECUTION_TIME_MS", 30)?,
            hybrid_fallback_timeout_ms: env_parse("ARB_HYBRID_FALLBACK_TIMEOUT_MS", 15)?,
            max_retries: env_parse("ARB_MAX_RETRIES", 3u32)?,
            retry_base_delay_ms: env_parse("ARB_RETRY_BASE_DELAY_MS", 50u64)?,
            retry_jitter_pct: env_parse_f64("ARB_RETRY_JITTER_PCT", 0.20),
            order_submission_delay_ms: env_parse("ARB_ORDER_SUBMISSION_DELAY_MS", 0u64)?,
            rebalance_size_tolerance_contracts: env_parse(
                "ARB_REBALANCE_SIZE_TOLERANCE_CONTRACTS",
                0,
            )?,
            dependency_confidence_floor: env_parse_f64("ARB_DEPENDENCY_CONFIDENCE_FLOOR", 0.6),
            strategy_version: env::var("ARB_STRATEGY_VERSION").unwrap_or_else(|_| "1.0.0".to_string()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_capital_per_trade <= 0.0 || self.max_capital_per_trade > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "max_capital_per_trade",
                range: "(0, 1]",
                value: self.max_capital_per_trade.to_string(),
            });
        }
        if self.max_position_fraction <= 0.0 || self.max_position_fraction > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "max_position_fraction",
                range: "(0, 1]",
                value: self.max_position_fraction.to_string(),
            });
        }
        if self.max_snapshot_age_ms <= 0 {
            return Err(ConfigError::NotPositive {
                field: "max_snapshot_age_ms",
                value: self.max_snapshot_age_ms.to_string(),
            });
        }
        if self.max_position_contracts <= 0 {
            return Err(ConfigError::NotPositive {
                field: "max_position_contracts",
                value: self.max_position_contracts.to_string(),
            });
        }
        if self.rebalance_size_tolerance_contracts < 0 {
            return Err(ConfigError::OutOfRange {
                field: "rebalance_size_tolerance_contracts",
                range: "[0, inf)",
                value: self.rebalance_size_tolerance_contracts.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_capital_fraction() {
        let mut cfg = EngineConfig::default();
        cfg.max_capital_per_trade = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_tolerance() {
        let mut cfg = EngineConfig::default();
        cfg.rebalance_size_tolerance_contracts = -1;
        assert!(cfg.validate().is_err());
    }
}
