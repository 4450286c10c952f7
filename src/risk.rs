//! Risk gate.
//!
//! The six-step rule order mirrors `risk/vwap_checks.py`'s
//! `check_trade_with_vwap`: run the portfolio-level filters first (there,
//! `check_trade_allowed`'s daily-loss/exposure gate), then liquidity and
//! slippage checks, adjusting size downward before rejecting outright. This
//! module collapses that cascade into one ordered pass over typed reason
//! codes instead of the original's `(bool, Option<int>, str)` tuple.

use crate::config::EngineConfig;
use crate::error::RiskReason;
use crate::opportunity::Opportunity;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAction {
    Allow,
    Adjust,
    Deny,
}

/// Verdict for one opportunity at one point in time. Never constructed
/// outside [`RiskGate::evaluate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub opportunity_id: String,
    pub action: RiskAction,
    pub size_adjusted_contracts: i64,
    pub reason: RiskReason,
    /// Copied from the opportunity this decision was evaluated against so
    /// a stored decision is self-describing.
    pub run_id: String,
    pub strategy_version: String,
}

/// Portfolio-level state supplied by the caller alongside an opportunity.
/// Optional — when omitted, only the per-opportunity rules (snapshot age,
/// expiry, edge, slippage, position cap) run.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioContext {
    /// Realized P&L for the current trading day. Negative means a loss.
    pub daily_realized_pnl_usd: Decimal,
    /// Total notional currently at risk across all open positions.
    pub gross_exposure_usd: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_daily_loss_usd: Decimal,
    pub max_gross_exposure_usd: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_usd: Decimal::from(5_000),
            max_gross_exposure_usd: Decimal::from(50_000),
        }
    }
}

/// Stateless aside from its config and limits — the running P&L and
/// exposure figures it checks against are supplied per call, not tracked
/// internally, so there is nothing here for a concurrent writer to race.
pub struct RiskGate {
    config: EngineConfig,
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(config: EngineConfig, limits: RiskLimits) -> Self {
        Self { config, limits }
    }

    /// Evaluate `opportunity` for a requested size of `requested_contracts`,
    /// given freshly-measured `predicted_slippage_bps` and
    /// `snapshot_age_ms`. Rule order is fixed: a deny on an earlier rule
    /// short-circuits everything after it.
    pub fn evaluate(
        &self,
        opportunity: &Opportunity,
        requested_contracts: i64,
        predicted_slippage_bps: i64,
        snapshot_age_ms: i64,
        now_ms: i64,
        portfolio: Option<PortfolioContext>,
    ) -> RiskDecision {
        let deny = |reason: RiskReason| RiskDecision {
            opportunity_id: opportunity.opportunity_id.clone(),
            action: RiskAction::Deny,
            size_adjusted_contracts: 0,
            reason,
            run_id: opportunity.run_id.clone(),
            strategy_version: opportunity.strategy_version.clone(),
        };

        if let Some(ctx) = portfolio {
            if ctx.daily_realized_pnl_usd <= -self.limits.max_daily_loss_usd {
                tracing::warn!(
                    opportunity_id = %opportunity.opportunity_id,
                    daily_pnl = %ctx.daily_realized_pnl_usd,
                    "risk gate denied: daily loss limit breached"
                );
                return deny(RiskReason::RiskDailyLoss);
            }
            if ctx.gross_exposure_usd >= self.limits.max_gross_exposure_usd {
                tracing::warn!(
                    opportunity_id = %opportunity.opportunity_id,
                    gross_exposure = %ctx.gross_exposure_usd,
                    "risk gate denied: gross exposure limit breached"
                );
                return deny(RiskReason::RiskExposure);
            }
        }

        if snapshot_age_ms > self.config.max_snapshot_age_ms {
            return deny(RiskReason::RiskStale);
        }
        if now_ms > opportunity.expires_at_ms {
            return deny(RiskReason::RiskStale);
        }
        if opportunity.edge_bps_net < self.config.min_edge_bps_net_hard {
            return deny(RiskReason::RiskEdge);
        }
        if predicted_slippage_bps > self.config.max_slippage_bps_hard_per_leg {
            return deny(RiskReason::RiskSlippage);
        }

        let scaled = ((requested_contracts as f64 * opportunity.risk_multiplier).ceil() as i64).max(1);
        if scaled > self.config.max_position_contracts {
            return RiskDecision {
                opportunity_id: opportunity.opportunity_id.clone(),
                action: RiskAction::Adjust,
                size_adjusted_contracts: self.config.max_position_contracts,
                reason: RiskReason::RiskExposure,
                run_id: opportunity.run_id.clone(),
                strategy_version: opportunity.strategy_version.clone(),
            };
        }

        RiskDecision {
            opportunity_id: opportunity.opportunity_id.clone(),
            action: RiskAction::Allow,
            size_adjusted_contracts: scaled,
            reason: RiskReason::RiskOk,
            run_id: opportunity.run_id.clone(),
            strategy_version: opportunity.strategy_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::{OpportunityKind, TradeLeg};
    use crate::pricer::Side as PriceSide;
    use rust_decimal_macros::dec;

    fn opportunity(edge_bps_net: i64, expires_at_ms: i64, risk_multiplier: f64) -> Opportunity {
        Opportunity {
            opportunity_id: "opp-1".to_string(),
            kind: OpportunityKind::BinaryComplement,
            markets: vec!["m1".to_string()],
            legs: vec![TradeLeg::new("m1", PriceSide::Yes, dec!(10), Some(dec!(0.5)), "polymarket")],
            edge_bps_net,
            confidence: 0.8,
            created_at_ms: 0,
            expires_at_ms,
            ttl_ms: 500,
            risk_multiplier,
            run_id: "test-run".to_string(),
            strategy_version: "1.0.0".to_string(),
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(EngineConfig::default(), RiskLimits::default())
    }

    #[test]
    fn allows_within_all_thresholds() {
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 25, 50, 100, 1_000, None);
        assert_eq!(decision.action, RiskAction::Allow);
        assert_eq!(decision.reason, RiskReason::RiskOk);
        assert_eq!(decision.size_adjusted_contracts, 25);
    }

    #[test]
    fn denies_on_stale_snapshot() {
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 25, 50, 800, 1_000, None);
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskStale);
    }

    #[test]
    fn denies_on_expired_opportunity() {
        let decision = gate().evaluate(&opportunity(150, 900, 1.0), 25, 50, 100, 1_000, None);
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskStale);
    }

    #[test]
    fn denies_on_edge_below_hurdle() {
        let decision = gate().evaluate(&opportunity(80, 1_500, 1.0), 25, 50, 100, 1_000, None);
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskEdge);
    }

    #[test]
    fn denies_on_slippage_above_hurdle() {
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 25, 150, 100, 1_000, None);
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskSlippage);
    }

    #[test]
    fn adjusts_down_to_position_cap() {
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 500, 50, 100, 1_000, None);
        assert_eq!(decision.action, RiskAction::Adjust);
        assert_eq!(decision.reason, RiskReason::RiskExposure);
        assert_eq!(decision.size_adjusted_contracts, 100);
    }

    #[test]
    fn denies_on_daily_loss_breach() {
        let ctx = PortfolioContext {
            daily_realized_pnl_usd: dec!(-6000),
            gross_exposure_usd: dec!(0),
        };
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 25, 50, 100, 1_000, Some(ctx));
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskDailyLoss);
    }

    #[test]
    fn denies_on_gross_exposure_breach() {
        let ctx = PortfolioContext {
            daily_realized_pnl_usd: dec!(0),
            gross_exposure_usd: dec!(60000),
        };
        let decision = gate().evaluate(&opportunity(150, 1_500, 1.0), 25, 50, 100, 1_000, Some(ctx));
        assert_eq!(decision.action, RiskAction::Deny);
        assert_eq!(decision.reason, RiskReason::RiskExposure);
    }
}
