//! Orchestrator-facing facade: the small surface an external orchestrator
//! is allowed to drive.
//!
//! Wires the snapshot store through the metrics recorder behind the four
//! calls an external orchestrator is allowed to make: `ingest_snapshot`,
//! `scan`, `execute`, and `metrics()`. Shaped after `arbitrage/engine.rs`'s
//! `ArbitrageEngine` (fetch state, validate/enhance, return opportunities)
//! generalized to this crate's multi-stage pipeline plus the execute/metrics
//! calls that engine left to its own caller loop.

use crate::book_store::{OrderBookSnapshot, SnapshotStore};
use crate::config::EngineConfig;
use crate::dependency::{self, DependencyVerifier, MarketRef};
use crate::executor::{ExecutionStrategy, MultiLegTrade, ParallelExecutor};
use crate::metrics::{MetricsRecorder, MetricsSummary};
use crate::opportunity::{self, Market, Opportunity};
use crate::pricer;
use crate::risk::{PortfolioContext, RiskAction, RiskGate, RiskLimits};
use crate::venue::VenueAdapter;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds the tracked market universe, the snapshot store, and the risk
/// gate / executor / metrics stack. Nothing here is mutated except through
/// the four methods below;
/// `markets` is the one piece of state an orchestrator updates directly
/// via [`ArbEngine::upsert_market`].
pub struct ArbEngine {
    config: EngineConfig,
    run_id: String,
    book_store: SnapshotStore,
    markets: RwLock<HashMap<String, Market>>,
    /// Capital available for categorical-rebalance sizing, refreshed by the
    /// orchestrator (e.g. from a venue `get_balance()` call) via
    /// [`ArbEngine::set_available_capital`]. Zero until set.
    available_capital: RwLock<Decimal>,
    risk_gate: RiskGate,
    executor: ParallelExecutor,
    metrics: MetricsRecorder,
    verifier: Option<Arc<dyn DependencyVerifier>>,
}

impl ArbEngine {
    pub fn new(
        config: EngineConfig,
        run_id: impl Into<String>,
        venues: HashMap<String, Arc<dyn VenueAdapter>>,
        risk_limits: RiskLimits,
    ) -> Self {
        Self {
            risk_gate: RiskGate::new(config.clone(), risk_limits),
            executor: ParallelExecutor::new(venues),
            metrics: MetricsRecorder::new(),
            book_store: SnapshotStore::new(),
            markets: RwLock::new(HashMap::new()),
            available_capital: RwLock::new(Decimal::ZERO),
            verifier: None,
            config,
            run_id: run_id.into(),
        }
    }

    /// Attach the optional stage-2 dependency verifier. The core never
    /// blocks `scan` on this; it is consulted synchronously only where an
    /// orchestrator has already resolved the verifier's result (this facade
    /// keeps stage 1 as the one `scan` actually runs — the core never waits
    /// on stage 2).
    pub fn with_verifier(mut self, verifier: Arc<dyn DependencyVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// The attached stage-2 verifier, if any, for an orchestrator that wants
    /// to call it directly (e.g. to cache a result per pair).
    pub fn verifier(&self) -> Option<&Arc<dyn DependencyVerifier>> {
        self.verifier.as_ref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Add or replace one market's metadata in the tracked universe.
    /// Venue metadata ingestion (REST polling, WS market lists) is the
    /// orchestrator's concern; this only stores what `scan` needs.
    pub fn upsert_market(&self, market: Market) {
        self.markets.write().insert(market.id.clone(), market);
    }

    pub fn remove_market(&self, market_id: &str) {
        self.markets.write().remove(market_id);
    }

    /// Refresh the capital figure `scan` uses to size categorical
    /// rebalances. The orchestrator is expected to call this with the
    /// combined venue balance (via `VenueAdapter::get_balance`) before
    /// scanning, since this crate never calls a venue itself from `scan`.
    pub fn set_available_capital(&self, capital: Decimal) {
        *self.available_capital.write() = capital;
    }

    /// Replaces the snapshot store's state for this asset. `venue` is
    /// accepted for parity with the external interface but
    /// the store itself is keyed by `asset_id`, not venue (one asset can in
    /// principle be quoted by more than one feed; the last snapshot applied
    /// wins subject to the monotonic-timestamp guard in `book_store`).
    pub fn ingest_snapshot(&self, _venue: &str, snapshot: OrderBookSnapshot) {
        self.book_store.apply_snapshot(snapshot);
    }

    /// Pure: reads the snapshot store and the tracked market list, places
    /// no orders, mutates no shared state.
    pub fn scan(&self, now_ms: i64) -> Vec<Opportunity> {
        let market_list: Vec<Market> = self.markets.read().values().cloned().collect();

        let mut opportunities = Vec::new();
        for market in &market_list {
            if let Some(opp) = opportunity::generate_binary_complement(
                market,
                &default_venue(market),
                &self.book_store,
                &self.config,
                now_ms,
                &self.run_id,
            ) {
                opportunities.push(opp);
            }
        }

        let refs: Vec<MarketRef> = market_list.iter().map(to_market_ref).collect();
        let assessments = dependency::detect(&refs, self.config.dependency_confidence_floor);
        let available_capital = *self.available_capital.read();
        for cluster in opportunity::cluster_markets(&market_list, &assessments) {
            if let Some(opp) = opportunity::generate_categorical_rebalance(
                &cluster,
                &default_venue(cluster[0]),
                &self.config,
                now_ms,
                &self.run_id,
                available_capital,
            ) {
                opportunities.push(opp);
            }
        }

        tracing::debug!(
            run_id = %self.run_id,
            count = opportunities.len(),
            markets_tracked = market_list.len(),
            "scan produced opportunities"
        );
        opportunities
    }

    /// Suspends. Re-measures slippage/staleness against the *current* snapshot store
    /// (an opportunity may have aged since `scan` produced it), runs it
    /// through the risk gate, advances the lifecycle, and — on an ALLOW or
    /// ADJUST — hands it to the executor. A DENY short-circuits before any
    /// order is placed and returns a trade with no legs submitted.
    ///
    /// `now_ms` is supplied by the caller rather than read from the system
    /// clock, matching every other component in this crate, so a replay can
    /// feed back recorded timestamps and get identical decisions; the
    /// executor's own internal poll-loop timing is the one place wall-clock
    /// time is read directly, since it is driving a real budget against real
    /// venue calls.
    pub async fn execute(
        &self,
        mut opportunity: Opportunity,
        strategy: ExecutionStrategy,
        now_ms: i64,
        portfolio: Option<PortfolioContext>,
    ) -> MultiLegTrade {
        let (predicted_slippage_bps, snapshot_age_ms) = self.remeasure(&opportunity, now_ms);
        let requested_contracts = opportunity
            .legs
            .iter()
            .map(|leg| leg.target_qty)
            .fold(None, |acc: Option<Decimal>, qty| match acc {
                None => Some(qty),
                Some(a) => Some(a.min(qty)),
            })
            .and_then(|d| d.trunc().try_into().ok())
            .unwrap_or(self.config.probe_quantity_contracts);

        let decision = self.risk_gate.evaluate(
            &opportunity,
            requested_contracts,
            predicted_slippage_bps,
            snapshot_age_ms,
            now_ms,
            portfolio,
        );

        tracing::info!(
            run_id = %self.run_id,
            opportunity_id = %opportunity.opportunity_id,
            action = ?decision.action,
            reason = ?decision.reason,
            "risk decision"
        );

        if decision.action == RiskAction::Deny {
            return MultiLegTrade::denied(&opportunity, strategy, &self.config, decision.reason);
        }

        if decision.action == RiskAction::Adjust {
            scale_legs(&mut opportunity, decision.size_adjusted_contracts);
        }

        let trade = self.executor.execute(opportunity, strategy, &self.config).await;
        self.metrics.record(&trade, now_ms);
        trade
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Re-walks each leg's market against the live snapshot store, returning
    /// `(max slippage_bps across legs, max snapshot age_ms across legs)` —
    /// the two inputs the risk gate needs beyond what the opportunity
    /// already carries.
    fn remeasure(&self, opportunity: &Opportunity, now_ms: i64) -> (i64, i64) {
        let markets = self.markets.read();
        let mut max_slippage = 0i64;
        let mut max_age = 0i64;
        for leg in &opportunity.legs {
            let Some(market) = markets.get(&leg.market_id) else {
                continue;
            };
            let Some(snapshot) = self.book_store.get(&market.asset_id) else {
                max_age = max_age.max(self.config.max_snapshot_age_ms + 1);
                continue;
            };
            let priced = pricer::estimate(
                &leg.market_id,
                leg.side,
                leg.target_qty,
                &snapshot,
                leg.target_price,
                now_ms,
                self.config.max_snapshot_age_ms,
            );
            max_slippage = max_slippage.max(priced.slippage_bps);
            max_age = max_age.max(priced.snapshot_age_ms);
        }
        (max_slippage, max_age)
    }
}

fn default_venue(market: &Market) -> String {
    market
        .group_id
        .clone()
        .unwrap_or_else(|| "polymarket".to_string())
}

fn to_market_ref(market: &Market) -> MarketRef {
    MarketRef {
        id: market.id.clone(),
        platform: "polymarket".to_string(),
        title: market.title.clone(),
        resolved: market.resolved,
        close_time_ms: market.close_time_ms,
    }
}

/// Scale every leg's `target_qty` down to `scaled_contracts`, preserving the
/// outcome-neutral equal-sizing invariant categorical rebalances rely on —
/// a RISK_EXPOSURE ADJUST shrinks every leg by the same count, never just
/// one.
fn scale_legs(opportunity: &mut Opportunity, scaled_contracts: i64) {
    let target = Decimal::from(scaled_contracts);
    for leg in opportunity.legs.iter_mut() {
        if leg.target_qty > target {
            leg.target_qty = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_store::Level;
    use crate::venue::{OrderHandle, OrderSide, OrderStatus, OrderType, OrderUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    struct AlwaysFillsVenue {
        orders: Mutex<HashMap<String, Decimal>>,
    }

    impl AlwaysFillsVenue {
        fn new() -> Self {
            Self {
                orders: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for AlwaysFillsVenue {
        fn name(&self) -> &str {
            "polymarket"
        }
        async fn connect(&self) -> Result<(), crate::error::VenueError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        async fn get_balance(&self) -> Result<Decimal, crate::error::VenueError> {
            Ok(Decimal::from(1_000_000))
        }
        async fn get_orderbook(
            &self,
            _market_id: &str,
        ) -> Result<OrderBookSnapshot, crate::error::VenueError> {
            Err(crate::error::VenueError::MarketNotOpen)
        }
        async fn place_order(
            &self,
            market_id: &str,
            _side: OrderSide,
            _order_type: OrderType,
            quantity: Decimal,
            _price: Option<Decimal>,
        ) -> Result<OrderHandle, crate::error::VenueError> {
            self.orders.lock().insert(market_id.to_string(), quantity);
            Ok(OrderHandle {
                order_id: format!("order-{market_id}"),
                market_id: market_id.to_string(),
            })
        }
        async fn cancel_order(&self, _handle: &OrderHandle) -> Result<bool, crate::error::VenueError> {
            Ok(true)
        }
        async fn get_order(&self, handle: &OrderHandle) -> Result<OrderUpdate, crate::error::VenueError> {
            let qty = *self
                .orders
                .lock()
                .get(&handle.market_id)
                .unwrap_or(&Decimal::ZERO);
            Ok(OrderUpdate {
                status: OrderStatus::Filled,
                filled_qty: qty,
                avg_fill_price: Some(dec!(0.5)),
            })
        }
    }

    fn engine() -> ArbEngine {
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        venues.insert("polymarket".to_string(), Arc::new(AlwaysFillsVenue::new()));
        ArbEngine::new(EngineConfig::default(), "test-run", venues, RiskLimits::default())
    }

    fn market(id: &str, yes: Decimal) -> Market {
        Market {
            id: id.to_string(),
            ticker: id.to_string(),
            title: format!("market {id}"),
            asset_id: id.to_string(),
            yes_price: yes,
            no_price: Decimal::ONE - yes,
            liquidity_usd: dec!(100_000),
            close_time_ms: 10_000_000,
            resolved: false,
            group_id: None,
        }
    }

    #[test]
    fn scan_is_empty_with_no_markets() {
        let engine = engine();
        assert!(engine.scan(1_000).is_empty());
    }

    #[test]
    fn scan_emits_binary_complement_from_ingested_snapshot() {
        let engine = engine();
        engine.upsert_market(market("m1", dec!(0.50)));
        engine.ingest_snapshot(
            "polymarket",
            OrderBookSnapshot {
                market_id: "m1".into(),
                asset_id: "m1".into(),
                bids: vec![Level::new(dec!(0.47), dec!(200)), Level::new(dec!(0.46), dec!(200))],
                asks: vec![Level::new(dec!(0.50), dec!(200)), Level::new(dec!(0.51), dec!(200))],
                timestamp: 1_000,
                sequence_hash: 1,
            },
        );
        let opportunities = engine.scan(1_000);
        assert_eq!(opportunities.len(), 1);
    }

    #[tokio::test]
    async fn execute_commits_and_records_metrics() {
        let engine = engine();
        engine.upsert_market(market("m1", dec!(0.50)));
        engine.ingest_snapshot(
            "polymarket",
            OrderBookSnapshot {
                market_id: "m1".into(),
                asset_id: "m1".into(),
                bids: vec![Level::new(dec!(0.47), dec!(200)), Level::new(dec!(0.46), dec!(200))],
                asks: vec![Level::new(dec!(0.50), dec!(200)), Level::new(dec!(0.51), dec!(200))],
                timestamp: 1_000,
                sequence_hash: 1,
            },
        );
        let opportunities = engine.scan(1_000);
        let opportunity = opportunities.into_iter().next().expect("one opportunity");
        let trade = engine
            .execute(opportunity, ExecutionStrategy::Market, 1_000, None)
            .await;
        assert!(trade.committed);
        let summary = engine.metrics_summary();
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn execute_denies_without_submitting_orders() {
        let engine = engine();
        engine.upsert_market(market("m1", dec!(0.50)));
        // No snapshot ingested: remeasure() sees a missing snapshot, pushing
        // snapshot age past the hard limit, so the risk gate denies on
        // staleness before any leg is submitted.
        let opportunity = Opportunity {
            opportunity_id: "opp-manual".to_string(),
            kind: crate::opportunity::OpportunityKind::BinaryComplement,
            markets: vec!["m1".to_string()],
            legs: vec![crate::opportunity::TradeLeg::new(
                "m1",
                pricer::Side::Yes,
                dec!(10),
                Some(dec!(0.5)),
                "polymarket",
            )],
            edge_bps_net: 150,
            confidence: 0.8,
            created_at_ms: 0,
            expires_at_ms: 1_000_000,
            ttl_ms: 500,
            risk_multiplier: 1.0,
            run_id: "test-run".to_string(),
            strategy_version: "1.0.0".to_string(),
        };
        let trade = engine
            .execute(opportunity, ExecutionStrategy::Market, 100, None)
            .await;
        assert!(trade.rolled_back);
        assert!(!trade.committed);
        assert!(trade.legs.iter().all(|l| l.status == crate::opportunity::LegStatus::Pending));
    }
}
