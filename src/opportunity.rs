//! Opportunity generator.
//!
//! Binary-complement path ported from `polymarket_arb_v1.py`'s
//! `scan_markets`: price the complement, apply the net-edge-after-fee-buffer
//! hurdle, emit one opportunity per eligible market. Categorical path groups
//! markets via dependency relations and hands sizing to the rebalancing
//! optimizer.

use crate::book_store::SnapshotStore;
use crate::config::EngineConfig;
use crate::dependency::{DependencyAssessment, Relation};
use crate::optimizer::{self, RebalanceInput};
use crate::pricer::{self, Side as PriceSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct Market {
    pub id: String,
    pub ticker: String,
    pub title: String,
    pub asset_id: String,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub liquidity_usd: Decimal,
    pub close_time_ms: i64,
    pub resolved: bool,
    /// Markets sharing a `group_id` are candidate outcomes of the same
    /// categorical cluster.
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityKind {
    BinaryComplement,
    CategoricalRebalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    Pending,
    Submitted,
    Filled,
    PartiallyFilled,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLeg {
    pub market_id: String,
    pub side: PriceSide,
    pub target_qty: Decimal,
    pub target_price: Option<Decimal>,
    pub venue: String,
    pub status: LegStatus,
    pub order_id: Option<String>,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub submission_ts: Option<i64>,
    pub fill_ts: Option<i64>,
    pub error: Option<String>,
}

impl TradeLeg {
    pub fn new(market_id: impl Into<String>, side: PriceSide, target_qty: Decimal, target_price: Option<Decimal>, venue: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            target_qty,
            target_price,
            venue: venue.into(),
            status: LegStatus::Pending,
            order_id: None,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            submission_ts: None,
            fill_ts: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub opportunity_id: String,
    pub kind: OpportunityKind,
    pub markets: Vec<String>,
    pub legs: Vec<TradeLeg>,
    pub edge_bps_net: i64,
    pub confidence: f64,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub ttl_ms: i64,
    pub risk_multiplier: f64,
    /// Caller-supplied run identifier and this crate's strategy version,
    /// carried through to the `RiskDecision`/`MultiLegTrade` it produces so
    /// a consumer can replay the exact rules that generated a stored record.
    pub run_id: String,
    pub strategy_version: String,
}

fn opportunity_id(market_ids: &[&str], now_ms: i64) -> String {
    let mut sorted: Vec<&str> = market_ids.to_vec();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    sorted.join("|").hash(&mut hasher);
    now_ms.hash(&mut hasher);
    format!("opp-{:016x}", hasher.finish())
}

/// Binary complement candidate for one market. Returns `None` when the
/// snapshot is missing/stale, depth is insufficient, or the net edge after
/// `fee_buffer_bps` falls short of `min_edge_bps_net_hard`.
pub fn generate_binary_complement(
    market: &Market,
    venue: &str,
    store: &SnapshotStore,
    config: &EngineConfig,
    now_ms: i64,
    run_id: &str,
) -> Option<Opportunity> {
    if market.resolved {
        return None;
    }
    let snapshot = store.get(&market.asset_id)?;
    let probe_qty = Decimal::from(config.probe_quantity_contracts);
    let pricing = pricer::estimate_complement(
        &market.id,
        probe_qty,
        &snapshot,
        now_ms,
        config.max_snapshot_age_ms,
    );

    if pricing.yes_buy.is_stale || pricing.no_buy.is_stale {
        return None;
    }
    if !pricing.yes_buy.liquidity_sufficient || !pricing.no_buy.liquidity_sufficient {
        return None;
    }

    let gross_edge_bps = ((Decimal::ONE - pricing.total_cost) * Decimal::from(10_000))
        .trunc()
        .try_into()
        .unwrap_or(0i64);
    let net_edge_bps = gross_edge_bps - config.fee_buffer_bps;
    if net_edge_bps < config.min_edge_bps_net_hard {
        return None;
    }

    let created_at_ms = now_ms;
    let ttl_ms = config.ttl_ms_default;
    let legs = vec![
        TradeLeg::new(
            market.id.clone(),
            PriceSide::Yes,
            probe_qty,
            Some(pricing.yes_buy.executable_price),
            venue,
        ),
        TradeLeg::new(
            market.id.clone(),
            PriceSide::No,
            probe_qty,
            Some(pricing.no_buy.executable_price),
            venue,
        ),
    ];

    Some(Opportunity {
        opportunity_id: opportunity_id(&[&market.id], created_at_ms),
        kind: OpportunityKind::BinaryComplement,
        markets: vec![market.id.clone()],
        legs,
        edge_bps_net: net_edge_bps,
        confidence: 0.8,
        created_at_ms,
        expires_at_ms: created_at_ms + ttl_ms,
        ttl_ms,
        risk_multiplier: 1.0,
        run_id: run_id.to_string(),
        strategy_version: config.strategy_version.clone(),
    })
}

/// Group markets into categorical clusters using EQUIVALENT/MUTUALLY_EXCLUSIVE
/// dependency assessments — markets connected by either relation are treated
/// as outcomes of the same event for rebalancing purposes.
pub fn cluster_markets<'a>(
    markets: &'a [Market],
    assessments: &[DependencyAssessment],
) -> Vec<Vec<&'a Market>> {
    let mut parent: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
    for m in markets {
        parent.insert(&m.id, &m.id);
    }

    fn find<'a>(parent: &mut std::collections::HashMap<&'a str, &'a str>, x: &'a str) -> &'a str {
        let p = *parent.get(x).unwrap_or(&x);
        if p == x {
            x
        } else {
            let root = find(parent, p);
            parent.insert(x, root);
            root
        }
    }

    for assessment in assessments {
        if !matches!(assessment.relation, Relation::Equivalent | Relation::MutuallyExclusive) {
            continue;
        }
        if !parent.contains_key(assessment.market_a.as_str())
            || !parent.contains_key(assessment.market_b.as_str())
        {
            continue;
        }
        let ra = find(&mut parent, &assessment.market_a);
        let rb = find(&mut parent, &assessment.market_b);
        if ra != rb {
            parent.insert(ra, rb);
        }
    }

    let mut groups: std::collections::HashMap<&str, Vec<&Market>> = std::collections::HashMap::new();
    for m in markets {
        let root = find(&mut parent, &m.id);
        groups.entry(root).or_default().push(m);
    }
    groups.into_values().filter(|g| g.len() >= 2).collect()
}

const MIN_DEVIATION: Decimal = rust_decimal_macros::dec!(0.02);
const MIN_OUTCOMES: usize = 3;
const MAX_OUTCOMES: usize = 20;
const MIN_LIQUIDITY_RATIO: f64 = 0.3;

/// Categorical-rebalance candidate for one cluster. Returns `None` when the
/// cluster is out of the `[min_outcomes, max_outcomes]` range, the liquidity
/// bottleneck ratio is too thin, or the price-sum deviation from 1 doesn't
/// clear `MIN_DEVIATION`.
pub fn generate_categorical_rebalance(
    cluster: &[&Market],
    venue: &str,
    config: &EngineConfig,
    now_ms: i64,
    run_id: &str,
    available_capital: Decimal,
) -> Option<Opportunity> {
    if cluster.len() < MIN_OUTCOMES || cluster.len() > MAX_OUTCOMES {
        return None;
    }
    let sum: Decimal = cluster.iter().map(|m| m.yes_price).sum();
    let deviation = (Decimal::ONE - sum).abs();
    if deviation < MIN_DEVIATION {
        return None;
    }

    let min_liq = cluster.iter().map(|m| m.liquidity_usd).min()?;
    let max_liq = cluster.iter().map(|m| m.liquidity_usd).max()?;
    if max_liq <= Decimal::ZERO {
        return None;
    }
    let ratio: f64 = (min_liq / max_liq).try_into().unwrap_or(0.0);
    if ratio < MIN_LIQUIDITY_RATIO {
        return None;
    }

    let buy_yes = sum < Decimal::ONE;
    let fee_rate = Decimal::from(config.fee_buffer_bps) / Decimal::from(10_000);
    let allocation = optimizer::allocate(
        &RebalanceInput {
            outcomes: cluster
                .iter()
                .map(|m| {
                    let price = if buy_yes { m.yes_price } else { m.no_price };
                    optimizer::OutcomeInput {
                        market_id: m.id.clone(),
                        price,
                        depth_qty: m.liquidity_usd / m.yes_price.max(Decimal::new(1, 2)),
                        fees: price * fee_rate,
                    }
                })
                .collect(),
            available_capital,
            max_capital_per_trade: Decimal::try_from(config.max_capital_per_trade).unwrap_or(Decimal::new(1, 1)),
            max_position_fraction: Decimal::try_from(config.max_position_fraction).unwrap_or(Decimal::new(25, 2)),
            size_tolerance_contracts: Decimal::from(config.rebalance_size_tolerance_contracts),
        },
    );

    if allocation.quantities.iter().all(|q| *q == Decimal::ZERO) {
        return None;
    }

    let legs: Vec<TradeLeg> = cluster
        .iter()
        .zip(allocation.quantities.iter())
        .map(|(m, qty)| {
            TradeLeg::new(
                m.id.clone(),
                if buy_yes { PriceSide::Yes } else { PriceSide::No },
                *qty,
                Some(if buy_yes { m.yes_price } else { m.no_price }),
                venue,
            )
        })
        .collect();

    let gross_edge_bps = (deviation * Decimal::from(10_000)).trunc().try_into().unwrap_or(0i64);
    let net_edge_bps = gross_edge_bps - config.fee_buffer_bps;
    if net_edge_bps < config.min_edge_bps_net_hard {
        return None;
    }

    let market_ids: Vec<&str> = cluster.iter().map(|m| m.id.as_str()).collect();
    let created_at_ms = now_ms;
    Some(Opportunity {
        opportunity_id: opportunity_id(&market_ids, created_at_ms),
        kind: OpportunityKind::CategoricalRebalance,
        markets: cluster.iter().map(|m| m.id.clone()).collect(),
        legs,
        edge_bps_net: net_edge_bps,
        confidence: 0.7,
        created_at_ms,
        expires_at_ms: created_at_ms + config.ttl_ms_default,
        ttl_ms: config.ttl_ms_default,
        risk_multiplier: 1.0,
        run_id: run_id.to_string(),
        strategy_version: config.strategy_version.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_store::Level;
    use crate::book_store::OrderBookSnapshot;
    use rust_decimal_macros::dec;

    fn market(id: &str, yes: Decimal) -> Market {
        Market {
            id: id.to_string(),
            ticker: id.to_string(),
            title: format!("market {id}"),
            asset_id: id.to_string(),
            yes_price: yes,
            no_price: Decimal::ONE - yes,
            liquidity_usd: dec!(100_000),
            close_time_ms: 1_000_000,
            resolved: false,
            group_id: None,
        }
    }

    #[test]
    fn binary_complement_emits_when_edge_clears_hurdle() {
        let store = SnapshotStore::new();
        store.apply_snapshot(OrderBookSnapshot {
            market_id: "m1".into(),
            asset_id: "m1".into(),
            bids: vec![Level::new(dec!(0.47), dec!(200)), Level::new(dec!(0.46), dec!(200))],
            asks: vec![Level::new(dec!(0.50), dec!(200)), Level::new(dec!(0.51), dec!(200))],
            timestamp: 1_000,
            sequence_hash: 1,
        });
        let config = EngineConfig::default();
        let market = market("m1", dec!(0.50));
        let opp = generate_binary_complement(&market, "polymarket", &store, &config, 1_000, "test-run");
        assert!(opp.is_some());
        let opp = opp.unwrap();
        assert_eq!(opp.legs.len(), 2);
        assert!(opp.edge_bps_net >= config.min_edge_bps_net_hard);
    }

    #[test]
    fn binary_complement_skipped_when_stale() {
        let store = SnapshotStore::new();
        store.apply_snapshot(OrderBookSnapshot {
            market_id: "m1".into(),
            asset_id: "m1".into(),
            bids: vec![Level::new(dec!(0.47), dec!(200))],
            asks: vec![Level::new(dec!(0.50), dec!(200))],
            timestamp: 0,
            sequence_hash: 1,
        });
        let config = EngineConfig::default();
        let market = market("m1", dec!(0.50));
        let opp = generate_binary_complement(&market, "polymarket", &store, &config, 10_000, "test-run");
        assert!(opp.is_none());
    }

    #[test]
    fn cluster_groups_via_equivalent_relation() {
        let markets = vec![market("a", dec!(0.3)), market("b", dec!(0.3)), market("c", dec!(0.3))];
        let assessments = vec![
            DependencyAssessment {
                market_a: "a".into(),
                market_b: "b".into(),
                relation: Relation::MutuallyExclusive,
                confidence: 0.8,
                source: crate::dependency::AssessmentSource::Deterministic,
                reason: String::new(),
            },
            DependencyAssessment {
                market_a: "b".into(),
                market_b: "c".into(),
                relation: Relation::MutuallyExclusive,
                confidence: 0.8,
                source: crate::dependency::AssessmentSource::Deterministic,
                reason: String::new(),
            },
        ];
        let clusters = cluster_markets(&markets, &assessments);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }
}
