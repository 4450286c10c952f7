//! Parallel executor.
//!
//! Ported from `execution/parallel_executor.py`'s `ParallelExecutor`: submit
//! every leg concurrently, poll fills on a 100ms cadence, commit when all
//! legs fill or roll back (cancel pending, flatten filled) otherwise. The
//! original's gas/RPC-failover bookkeeping is venue-adapter plumbing and
//! stays out of this crate.

use crate::config::EngineConfig;
use crate::decimal::{to_f64, Usd, ZERO};
use crate::lifecycle::{ArbState, LifecycleRecord};
use crate::opportunity::{LegStatus, Opportunity, TradeLeg};
use crate::pricer::Side as PriceSide;
use crate::venue::{OrderHandle, OrderSide, OrderStatus, OrderType, VenueAdapter};
use futures::future::join_all;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    Market,
    Limit,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLegTrade {
    pub trade_id: String,
    pub legs: Vec<TradeLeg>,
    pub strategy: ExecutionStrategy,
    pub max_slippage_pct: f64,
    pub timeout_ms: i64,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub committed: bool,
    pub rolled_back: bool,
    pub expected_profit: Option<Usd>,
    pub actual_profit: Option<Usd>,
    pub lifecycle: LifecycleRecord,
    /// Copied from the opportunity this trade executed so a stored trade
    /// record is self-describing.
    pub run_id: String,
    pub strategy_version: String,
}

impl MultiLegTrade {
    fn new(opportunity: &Opportunity, strategy: ExecutionStrategy, config: &EngineConfig) -> Self {
        Self {
            trade_id: opportunity.opportunity_id.clone(),
            legs: opportunity.legs.clone(),
            strategy,
            max_slippage_pct: config.max_slippage_bps_hard_per_leg as f64 / 10_000.0,
            timeout_ms: config.max_execution_time_ms,
            start_ts: None,
            end_ts: None,
            committed: false,
            rolled_back: false,
            expected_profit: expected_profit(opportunity),
            actual_profit: None,
            lifecycle: LifecycleRecord::risk_approved(now_ms()),
            run_id: opportunity.run_id.clone(),
            strategy_version: opportunity.strategy_version.clone(),
        }
    }

    /// A trade that never reached the executor because the risk gate denied
    /// it (PRICED_EXECUTABLE -> RISK_REJECTED -> CLOSED). No leg is
    /// submitted; there is no third "unknown" outcome, so this still
    /// resolves to `rolled_back = true` rather than leaving both flags false.
    pub fn denied(
        opportunity: &Opportunity,
        strategy: ExecutionStrategy,
        config: &EngineConfig,
        reason: crate::error::RiskReason,
    ) -> Self {
        let ts = now_ms();
        let mut lifecycle = LifecycleRecord::new();
        lifecycle.transition(ArbState::PricedExecutable, ts);
        lifecycle.transition(ArbState::RiskRejected, ts);
        lifecycle.transition(ArbState::Closed, ts);
        tracing::info!(
            opportunity_id = %opportunity.opportunity_id,
            reason = ?reason,
            "opportunity denied by risk gate before execution"
        );
        Self {
            trade_id: opportunity.opportunity_id.clone(),
            legs: opportunity.legs.clone(),
            strategy,
            max_slippage_pct: config.max_slippage_bps_hard_per_leg as f64 / 10_000.0,
            timeout_ms: config.max_execution_time_ms,
            start_ts: Some(ts),
            end_ts: Some(ts),
            committed: false,
            rolled_back: true,
            expected_profit: expected_profit(opportunity),
            actual_profit: None,
            lifecycle,
            run_id: opportunity.run_id.clone(),
            strategy_version: opportunity.strategy_version.clone(),
        }
    }
}

/// `sum_i sign(leg) * target_price_i * target_qty_i` — buys are negative,
/// sell-equivalents positive. Every leg this crate generates is a buy (YES
/// buy, NO buy, or buy-all-outcomes), so this is `-total_cost` at the prices
/// locked in at opportunity-generation time. Kept on the same signed-notional
/// basis as `finalize`'s `actual_profit` (which has no separate payoff term
/// either — settlement payoff is realized outside this crate) so a perfect
/// fill at target prices yields `expected_profit == actual_profit`.
fn expected_profit(opportunity: &Opportunity) -> Option<Usd> {
    if opportunity.legs.is_empty() {
        return None;
    }
    let total: Decimal = opportunity
        .legs
        .iter()
        .map(|leg| leg.target_price.unwrap_or(ZERO) * leg.target_qty)
        .fold(Decimal::ZERO, |acc, notional| acc - notional);
    Some(total)
}

/// Pre-flight checks that run synchronously before any order is submitted.
/// Risk-gate ALLOW is the caller's responsibility since it runs before the
/// opportunity ever reaches the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightFailure {
    InsufficientBalance,
    VenueUnreachable(String),
}

pub fn preflight(
    legs: &[TradeLeg],
    venues: &HashMap<String, Arc<dyn VenueAdapter>>,
    combined_balance: Usd,
) -> Result<(), PreflightFailure> {
    for leg in legs {
        if !venues.contains_key(&leg.venue) {
            return Err(PreflightFailure::VenueUnreachable(leg.venue.clone()));
        }
    }
    let total_notional: Decimal = legs
        .iter()
        .map(|leg| leg.target_price.unwrap_or(ZERO) * leg.target_qty)
        .sum();
    if total_notional > combined_balance {
        return Err(PreflightFailure::InsufficientBalance);
    }
    Ok(())
}

/// Submits and monitors multi-leg trades against a fixed set of venue
/// adapters. Holds no back-reference to the opportunity generator or risk
/// gate — opportunities are consumed by value.
pub struct ParallelExecutor {
    venues: HashMap<String, Arc<dyn VenueAdapter>>,
    poll_interval: Duration,
}

impl ParallelExecutor {
    pub fn new(venues: HashMap<String, Arc<dyn VenueAdapter>>) -> Self {
        Self {
            venues,
            poll_interval: Duration::from_millis(100),
        }
    }

    fn venue(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.venues.get(name).cloned()
    }

    /// Execute `opportunity` under `strategy`, enforcing `config`'s
    /// end-to-end wall-clock budget. Always returns a finalized trade —
    /// either `committed` or `rolled_back`, never neither.
    pub async fn execute(
        &self,
        opportunity: Opportunity,
        strategy: ExecutionStrategy,
        config: &EngineConfig,
    ) -> MultiLegTrade {
        let mut trade = MultiLegTrade::new(&opportunity, strategy, config);
        trade
            .lifecycle
            .transition(ArbState::ExecutionSubmitted, now_ms());
        trade.start_ts = Some(now_ms());

        match strategy {
            ExecutionStrategy::Market => self.run_market(&mut trade, config).await,
            ExecutionStrategy::Limit => self.run_limit(&mut trade, config).await,
            ExecutionStrategy::Hybrid => self.run_hybrid(&mut trade, config).await,
        }

        trade.end_ts = Some(now_ms());
        self.finalize(&mut trade, config).await;
        trade
    }

    async fn run_market(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        self.submit_all(trade, OrderType::Market, config).await;
        self.wait_for_fills(trade, config.max_execution_time_ms, config)
            .await;
    }

    async fn run_limit(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        for leg in trade.legs.iter_mut() {
            if leg.target_price.is_none() {
                leg.status = LegStatus::Failed;
                leg.error = Some("no target price for limit order".to_string());
            }
        }
        self.submit_pending(trade, OrderType::Limit, config).await;
        self.wait_for_fills(trade, config.max_execution_time_ms * 10, config)
            .await;
    }

    async fn run_hybrid(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        self.submit_pending(trade, OrderType::Limit, config).await;
        let fallback_timeout = config.hybrid_fallback_timeout_ms;
        self.wait_for_fills(trade, fallback_timeout, config).await;

        let still_pending: Vec<usize> = trade
            .legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| leg_is_pending(leg.status))
            .map(|(i, _)| i)
            .collect();
        if still_pending.is_empty() {
            return;
        }

        tracing::info!(
            trade_id = %trade.trade_id,
            count = still_pending.len(),
            "hybrid fallback: cancelling and resubmitting as market"
        );
        self.cancel_legs(trade, &still_pending, config).await;
        for i in &still_pending {
            trade.legs[*i].status = LegStatus::Pending;
        }
        self.submit_indices(trade, &still_pending, OrderType::Market, config)
            .await;

        let remaining = (config.max_execution_time_ms - fallback_timeout).max(0);
        self.wait_for_fills(trade, remaining, config).await;
    }

    async fn submit_all(&self, trade: &mut MultiLegTrade, order_type: OrderType, config: &EngineConfig) {
        let indices: Vec<usize> = (0..trade.legs.len()).collect();
        self.submit_indices(trade, &indices, order_type, config).await;
    }

    async fn submit_pending(&self, trade: &mut MultiLegTrade, order_type: OrderType, config: &EngineConfig) {
        let indices: Vec<usize> = trade
            .legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| !matches!(leg.status, LegStatus::Failed))
            .map(|(i, _)| i)
            .collect();
        self.submit_indices(trade, &indices, order_type, config).await;
    }

    /// Submit the legs at `indices` concurrently. Submissions for one
    /// opportunity never serialize behind each other beyond an optional
    /// configurable stagger (`order_submission_delay_ms`, default 0,
    /// preserving that guarantee at the default).
    async fn submit_indices(
        &self,
        trade: &mut MultiLegTrade,
        indices: &[usize],
        order_type: OrderType,
        config: &EngineConfig,
    ) {
        let mut futures = Vec::with_capacity(indices.len());
        for (stagger, &i) in indices.iter().enumerate() {
            let leg = &trade.legs[i];
            let venue = self.venue(&leg.venue);
            let market_id = leg.market_id.clone();
            let side = to_order_side(leg.side);
            let qty = leg.target_qty;
            let price = match order_type {
                OrderType::Limit => leg.target_price,
                OrderType::Market => None,
            };
            let delay = Duration::from_millis(config.order_submission_delay_ms * stagger as u64);
            futures.push(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let submission_ts = now_ms();
                let result = match venue {
                    Some(adapter) => {
                        with_retry(config, || {
                            let adapter = adapter.clone();
                            let market_id = market_id.clone();
                            async move { adapter.place_order(&market_id, side, order_type, qty, price).await }
                        })
                        .await
                    }
                    None => Err(crate::error::VenueError::ConnectionDropped(
                        "venue not registered".to_string(),
                    )),
                };
                (i, submission_ts, result)
            });
        }
        let results = join_all(futures).await;
        for (i, submission_ts, result) in results {
            let leg = &mut trade.legs[i];
            leg.submission_ts = Some(submission_ts);
            match result {
                Ok(handle) => {
                    leg.order_id = Some(handle.order_id);
                    leg.status = LegStatus::Submitted;
                }
                Err(err) => {
                    leg.status = LegStatus::Failed;
                    leg.error = Some(err.to_string());
                }
            }
        }
    }

    /// Poll every pending leg's status on a fixed cadence until either all
    /// legs fill, any fails, or `timeout_ms` elapses.
    async fn wait_for_fills(&self, trade: &mut MultiLegTrade, timeout_ms: i64, config: &EngineConfig) {
        let deadline = now_ms() + timeout_ms.max(0);
        loop {
            self.poll_once(trade, config).await;
            if all_filled(trade) || any_failed(trade) {
                return;
            }
            if now_ms() >= deadline {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn poll_once(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        let indices: Vec<usize> = trade
            .legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| leg_is_pending(leg.status) && leg.order_id.is_some())
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return;
        }
        let mut futures = Vec::with_capacity(indices.len());
        for &i in &indices {
            let leg = &trade.legs[i];
            let venue = self.venue(&leg.venue);
            let handle = OrderHandle {
                order_id: leg.order_id.clone().unwrap_or_default(),
                market_id: leg.market_id.clone(),
            };
            futures.push(async move {
                let result = match venue {
                    Some(adapter) => {
                        with_retry(config, || {
                            let adapter = adapter.clone();
                            let handle = handle.clone();
                            async move { adapter.get_order(&handle).await }
                        })
                        .await
                    }
                    None => Err(crate::error::VenueError::ConnectionDropped(
                        "venue not registered".to_string(),
                    )),
                };
                (i, result)
            });
        }
        let results = join_all(futures).await;
        let fill_ts = now_ms();
        for (i, result) in results {
            let leg = &mut trade.legs[i];
            match result {
                Ok(update) => {
                    leg.filled_qty = update.filled_qty;
                    leg.avg_fill_price = update.avg_fill_price;
                    // FILLED iff filled_qty >= target_qty; a venue
                    // reporting OrderStatus::Filled below target is treated
                    // the same as a bona fide fill, matching that rule.
                    if update.status == OrderStatus::Filled || leg.filled_qty >= leg.target_qty {
                        leg.status = LegStatus::Filled;
                        leg.fill_ts = Some(fill_ts);
                    } else if update.status == OrderStatus::PartiallyFilled {
                        leg.status = LegStatus::PartiallyFilled;
                    } else if update.status.is_failed() {
                        leg.status = LegStatus::Failed;
                        leg.error = Some(format!("order {:?}", update.status));
                    }
                }
                Err(err) => {
                    leg.status = LegStatus::Failed;
                    leg.error = Some(err.to_string());
                }
            }
        }
    }

    async fn cancel_legs(&self, trade: &mut MultiLegTrade, indices: &[usize], config: &EngineConfig) {
        let mut futures = Vec::with_capacity(indices.len());
        for &i in indices {
            let leg = &trade.legs[i];
            let Some(order_id) = leg.order_id.clone() else {
                continue;
            };
            let venue = self.venue(&leg.venue);
            let handle = OrderHandle {
                order_id,
                market_id: leg.market_id.clone(),
            };
            futures.push(async move {
                let cancelled = match &venue {
                    Some(adapter) => {
                        with_retry(config, || {
                            let adapter = adapter.clone();
                            let handle = handle.clone();
                            async move { adapter.cancel_order(&handle).await }
                        })
                        .await
                    }
                    None => Ok(false),
                };
                // cancel_order returning false means the cancel did not take
                // the order off the book — typically because it already
                // filled. Re-query get_order to find out which, since the
                // venue's bool result can't express "already filled" itself.
                let recheck = match (&cancelled, &venue) {
                    (Ok(false), Some(adapter)) => {
                        let adapter = adapter.clone();
                        let handle = handle.clone();
                        Some(
                            with_retry(config, || {
                                let adapter = adapter.clone();
                                let handle = handle.clone();
                                async move { adapter.get_order(&handle).await }
                            })
                            .await,
                        )
                    }
                    _ => None,
                };
                (i, cancelled, recheck)
            });
        }
        let results = join_all(futures).await;
        let fill_ts = now_ms();
        for (i, cancelled, recheck) in results {
            let leg = &mut trade.legs[i];
            match cancelled {
                Ok(true) => {
                    if leg.status != LegStatus::Filled {
                        leg.status = LegStatus::Cancelled;
                    }
                }
                Ok(false) => {
                    // A cancel that reports "already filled" promotes the
                    // leg to FILLED rather than cancelled.
                    match recheck {
                        Some(Ok(update)) if update.status == OrderStatus::Filled => {
                            leg.filled_qty = update.filled_qty;
                            leg.avg_fill_price = update.avg_fill_price;
                            leg.status = LegStatus::Filled;
                            leg.fill_ts = Some(fill_ts);
                        }
                        Some(Ok(update)) if update.status.is_failed() => {
                            leg.status = LegStatus::Failed;
                        }
                        Some(Err(err)) => {
                            leg.error = Some(err.to_string());
                        }
                        _ => {}
                    }
                }
                Err(err) => {
                    leg.error = Some(err.to_string());
                }
            }
        }
    }

    /// Commit if every leg filled; otherwise roll back: cancel anything
    /// still pending and flatten every leg that did fill with an
    /// opposite-side market order.
    async fn finalize(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        if all_filled(trade) {
            let actual: Decimal = trade
                .legs
                .iter()
                .map(|leg| leg.avg_fill_price.unwrap_or(ZERO) * leg.filled_qty)
                .fold(Decimal::ZERO, |acc, notional| acc - notional);
            trade.actual_profit = Some(actual);
            trade.committed = true;
            trade.lifecycle.transition(ArbState::Filled, now_ms());
            trade.lifecycle.transition(ArbState::Closed, now_ms());

            if let Some(expected) = trade.expected_profit {
                if expected != Decimal::ZERO {
                    let slippage = to_f64((expected - actual).abs() / expected);
                    if slippage > trade.max_slippage_pct {
                        tracing::warn!(
                            trade_id = %trade.trade_id,
                            slippage,
                            max = trade.max_slippage_pct,
                            "trade exceeded max slippage after commit"
                        );
                    }
                }
            }
            return;
        }

        let pending: Vec<usize> = trade
            .legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| leg_is_pending(leg.status))
            .map(|(i, _)| i)
            .collect();
        self.cancel_legs(trade, &pending, config).await;

        let any_filled = trade
            .legs
            .iter()
            .any(|leg| matches!(leg.status, LegStatus::Filled | LegStatus::PartiallyFilled) && leg.filled_qty > ZERO);

        if any_filled {
            trade.lifecycle.transition(ArbState::PartialFill, now_ms());
            self.flatten_filled(trade, config).await;
            trade
                .lifecycle
                .transition(ArbState::HedgedOrFlattened, now_ms());
        } else {
            trade.lifecycle.transition(ArbState::Failed, now_ms());
        }
        trade.lifecycle.transition(ArbState::Closed, now_ms());
        trade.rolled_back = true;
    }

    /// Submit an opposite-side market order for `filled_qty` on every leg
    /// that retained exposure, zeroing it out.
    async fn flatten_filled(&self, trade: &mut MultiLegTrade, config: &EngineConfig) {
        let targets: Vec<usize> = trade
            .legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| {
                matches!(leg.status, LegStatus::Filled | LegStatus::PartiallyFilled) && leg.filled_qty > ZERO
            })
            .map(|(i, _)| i)
            .collect();

        let mut futures = Vec::with_capacity(targets.len());
        for &i in &targets {
            let leg = &trade.legs[i];
            let venue = self.venue(&leg.venue);
            let market_id = leg.market_id.clone();
            let exit_side = match to_order_side(leg.side) {
                OrderSide::Buy => OrderSide::Sell,
                OrderSide::Sell => OrderSide::Buy,
            };
            let qty = leg.filled_qty;
            futures.push(async move {
                match venue {
                    Some(adapter) => {
                        with_retry(config, || {
                            let adapter = adapter.clone();
                            let market_id = market_id.clone();
                            async move {
                                adapter
                                    .place_order(&market_id, exit_side, OrderType::Market, qty, None)
                                    .await
                            }
                        })
                        .await
                        .err()
                    }
                    None => Some(crate::error::VenueError::ConnectionDropped(
                        "venue not registered".to_string(),
                    )),
                }
            });
        }
        let results = join_all(futures).await;
        for (&i, err) in targets.iter().zip(results.into_iter()) {
            if let Some(err) = err {
                tracing::error!(
                    market_id = %trade.legs[i].market_id,
                    error = %err,
                    "flatten order failed, residual exposure may remain"
                );
            }
        }
    }
}

fn to_order_side(side: PriceSide) -> OrderSide {
    match side {
        PriceSide::Yes | PriceSide::No => OrderSide::Buy,
    }
}

/// Retry a venue call on retryable transport failures only: connection
/// drops, timeouts, and 5xx get exponential backoff with jitter up to
/// `config.max_retries`; a semantic rejection (order rejected, insufficient
/// funds, market not open) returns immediately. Ported from
/// `execution/polygon_optimizer.py`'s `RetryStrategy`, minus the RPC
/// endpoint-failover half of that class, which is venue-adapter plumbing
/// out of scope here.
async fn with_retry<F, Fut, T>(config: &EngineConfig, mut attempt_fn: F) -> Result<T, crate::error::VenueError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, crate::error::VenueError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                tokio::time::sleep(retry_delay(config, attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

fn retry_delay(config: &EngineConfig, attempt: u32) -> Duration {
    let base = config.retry_base_delay_ms as f64;
    let exponential = (base * 2f64.powi(attempt as i32)).min(base * MAX_BACKOFF_MULTIPLIER);
    let jitter_range = exponential * config.retry_jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };
    Duration::from_millis((exponential + jitter).max(0.0) as u64)
}

fn all_filled(trade: &MultiLegTrade) -> bool {
    !trade.legs.is_empty() && trade.legs.iter().all(|leg| leg.status == LegStatus::Filled)
}

fn any_failed(trade: &MultiLegTrade) -> bool {
    trade.legs.iter().any(|leg| leg.status == LegStatus::Failed)
}

/// A leg still awaiting a terminal outcome (mirrors `OrderStatus::is_pending`
/// one level up, since `LegStatus` tracks the leg rather than the order).
fn leg_is_pending(status: LegStatus) -> bool {
    matches!(status, LegStatus::Pending | LegStatus::Submitted | LegStatus::PartiallyFilled)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Test-only convenience for constructing a [`MultiLegTrade`] without a live
/// executor, used by `metrics.rs` unit tests to exercise the recorder
/// without standing up a venue adapter.
#[cfg(any(test, feature = "test-util"))]
pub struct TradeBuilder {
    trade: MultiLegTrade,
}

#[cfg(any(test, feature = "test-util"))]
impl TradeBuilder {
    pub fn new(trade_id: impl Into<String>, strategy: ExecutionStrategy) -> Self {
        Self {
            trade: MultiLegTrade {
                trade_id: trade_id.into(),
                legs: Vec::new(),
                strategy,
                max_slippage_pct: 0.03,
                timeout_ms: 30,
                start_ts: None,
                end_ts: None,
                committed: false,
                rolled_back: false,
                expected_profit: None,
                actual_profit: None,
                lifecycle: LifecycleRecord::new(),
                run_id: "test-run".to_string(),
                strategy_version: "1.0.0".to_string(),
            },
        }
    }

    pub fn with_legs(mut self, legs: Vec<TradeLeg>) -> Self {
        self.trade.legs = legs;
        self
    }

    pub fn committed(mut self, expected: Decimal, actual: Decimal, start_ts: i64, end_ts: i64) -> Self {
        self.trade.expected_profit = Some(expected);
        self.trade.actual_profit = Some(actual);
        self.trade.committed = true;
        self.trade.start_ts = Some(start_ts);
        self.trade.end_ts = Some(end_ts);
        self
    }

    pub fn rolled_back(mut self, start_ts: i64, end_ts: i64) -> Self {
        self.trade.rolled_back = true;
        self.trade.start_ts = Some(start_ts);
        self.trade.end_ts = Some(end_ts);
        self
    }

    pub fn build(self) -> MultiLegTrade {
        self.trade
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::TradeLeg;
    use crate::venue::{OrderHandle as Handle, OrderUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex as PMutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeVenue {
        fill_after_polls: usize,
        polls: AtomicUsize,
        cancel_result: bool,
        orders: PMutex<HashMap<String, Decimal>>,
    }

    impl FakeVenue {
        fn new(fill_after_polls: usize) -> Self {
            Self {
                fill_after_polls,
                polls: AtomicUsize::new(0),
                cancel_result: true,
                orders: PMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for FakeVenue {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> Result<(), crate::error::VenueError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn get_balance(&self) -> Result<Usd, crate::error::VenueError> {
            Ok(Decimal::from(1_000_000))
        }

        async fn get_orderbook(
            &self,
            _market_id: &str,
        ) -> Result<crate::book_store::OrderBookSnapshot, crate::error::VenueError> {
            unimplemented!("not exercised in executor tests")
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

        async fn cancel_order(&self, _handle: &Handle) -> Result<bool, crate::error::VenueError> {
            Ok(self.cancel_result)
        }

        async fn get_order(&self, handle: &Handle) -> Result<OrderUpdate, crate::error::VenueError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            let qty = *self
                .orders
                .lock()
                .get(&handle.market_id)
                .unwrap_or(&Decimal::ZERO);
            if n >= self.fill_after_polls {
                Ok(OrderUpdate {
                    status: OrderStatus::Filled,
                    filled_qty: qty,
                    avg_fill_price: Some(dec!(0.5)),
                })
            } else {
                Ok(OrderUpdate {
                    status: OrderStatus::Open,
                    filled_qty: Decimal::ZERO,
                    avg_fill_price: None,
                })
            }
        }
    }

    fn opportunity_with_legs(legs: Vec<TradeLeg>) -> Opportunity {
        Opportunity {
            opportunity_id: "opp-test".to_string(),
            kind: crate::opportunity::OpportunityKind::BinaryComplement,
            markets: vec!["m1".to_string()],
            legs,
            edge_bps_net: 150,
            confidence: 0.8,
            created_at_ms: now_ms(),
            expires_at_ms: now_ms() + 500,
            ttl_ms: 500,
            risk_multiplier: 1.0,
            run_id: "test-run".to_string(),
            strategy_version: "1.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn market_strategy_commits_when_both_legs_fill_immediately() {
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        venues.insert("polymarket".to_string(), Arc::new(FakeVenue::new(0)));
        let executor = ParallelExecutor::new(venues);

        let legs = vec![
            TradeLeg::new("m1", PriceSide::Yes, dec!(10), Some(dec!(0.5)), "polymarket"),
            TradeLeg::new("m1", PriceSide::No, dec!(10), Some(dec!(0.48)), "polymarket"),
        ];
        let opportunity = opportunity_with_legs(legs);
        let config = EngineConfig::default();

        let trade = executor
            .execute(opportunity, ExecutionStrategy::Market, &config)
            .await;

        assert!(trade.committed);
        assert!(!trade.rolled_back);
        assert_eq!(trade.lifecycle.current, ArbState::Closed);

        // A committed trade round-trips through JSON untouched — a consumer
        // storing (run_id, strategy_version) alongside a record needs the
        // record itself to serialize.
        let encoded = serde_json::to_string(&trade).expect("trade serializes");
        let decoded: MultiLegTrade = serde_json::from_str(&encoded).expect("trade deserializes");
        assert_eq!(decoded.run_id, trade.run_id);
        assert_eq!(decoded.strategy_version, trade.strategy_version);
        assert_eq!(decoded.committed, trade.committed);
    }

    #[tokio::test]
    async fn hybrid_falls_back_and_still_commits_when_market_fills() {
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        // fill_after_polls=1 means the first limit poll sees it pending,
        // forcing the hybrid fallback path; by the time market orders poll,
        // it reports filled.
        venues.insert("polymarket".to_string(), Arc::new(FakeVenue::new(0)));
        let executor = ParallelExecutor::new(venues);

        let legs = vec![TradeLeg::new(
            "m1",
            PriceSide::Yes,
            dec!(10),
            Some(dec!(0.5)),
            "polymarket",
        )];
        let opportunity = opportunity_with_legs(legs);
        let mut config = EngineConfig::default();
        config.hybrid_fallback_timeout_ms = 1;
        config.max_execution_time_ms = 30;

        let trade = executor
            .execute(opportunity, ExecutionStrategy::Hybrid, &config)
            .await;

        assert!(trade.committed || trade.rolled_back);
    }

    #[tokio::test]
    async fn missing_venue_fails_leg_and_rolls_back() {
        let venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        let executor = ParallelExecutor::new(venues);

        let legs = vec![TradeLeg::new(
            "m1",
            PriceSide::Yes,
            dec!(10),
            Some(dec!(0.5)),
            "nowhere",
        )];
        let opportunity = opportunity_with_legs(legs);
        let config = EngineConfig::default();

        let trade = executor
            .execute(opportunity, ExecutionStrategy::Market, &config)
            .await;

        assert!(trade.rolled_back);
        assert!(!trade.committed);
        assert_eq!(trade.legs[0].status, LegStatus::Failed);
    }

    #[test]
    fn preflight_rejects_unknown_venue() {
        let legs = vec![TradeLeg::new(
            "m1",
            PriceSide::Yes,
            dec!(10),
            Some(dec!(0.5)),
            "nowhere",
        )];
        let venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        let result = preflight(&legs, &venues, Decimal::from(1_000_000));
        assert_eq!(
            result,
            Err(PreflightFailure::VenueUnreachable("nowhere".to_string()))
        );
    }

    #[test]
    fn preflight_rejects_insufficient_balance() {
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        venues.insert("polymarket".to_string(), Arc::new(FakeVenue::new(0)));
        let legs = vec![TradeLeg::new(
            "m1",
            PriceSide::Yes,
            dec!(1_000_000),
            Some(dec!(0.9)),
            "polymarket",
        )];
        let result = preflight(&legs, &venues, Decimal::from(10));
        assert_eq!(result, Err(PreflightFailure::InsufficientBalance));
    }
}
