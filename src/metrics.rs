//! Metrics recorder.
//!
//! Ported from `execution/metrics.py`'s `MetricsCollector`/`ExecutionMetrics`:
//! per-trade records plus rolling aggregates (success rate, within-block
//! rate, profit-capture rate, strategy-stratified breakdowns). `fill_rate()`
//! and `within_block()` are kept as properties on the per-trade record
//! itself, not only computable through the aggregator.
//!
//! The ring is bounded at 10_000 trades, the way `risk.rs`'s `VaRCalculator`
//! and `DataSourceKillSwitch`'s latency window bound their own
//! `VecDeque` histories — old trades age out rather than growing memory
//! unbounded for a long-running process.

use crate::decimal::{to_f64, Usd};
use crate::executor::{ExecutionStrategy, MultiLegTrade};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

const RING_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ExecutionMetrics {
    pub trade_id: String,
    pub timestamp_ms: i64,
    pub strategy: ExecutionStrategy,
    pub num_legs: usize,
    pub legs_filled: usize,
    pub execution_time_ms: i64,
    pub committed: bool,
    pub rolled_back: bool,
    pub expected_profit: Option<Usd>,
    pub actual_profit: Option<Usd>,
    pub slippage_pct: Option<f64>,
    pub leg_execution_times_ms: Vec<i64>,
    pub leg_statuses: Vec<String>,
    pub errors: Vec<String>,
}

impl ExecutionMetrics {
    pub fn fill_rate(&self) -> f64 {
        if self.num_legs == 0 {
            0.0
        } else {
            self.legs_filled as f64 / self.num_legs as f64
        }
    }

    pub fn success(&self) -> bool {
        self.committed && !self.rolled_back
    }

    /// Did execution complete within one Polygon block (<= 30ms)?
    pub fn within_block(&self) -> bool {
        self.execution_time_ms <= 30
    }

    fn from_trade(trade: &MultiLegTrade, now_ms: i64) -> Self {
        let execution_time_ms = match (trade.start_ts, trade.end_ts) {
            (Some(start), Some(end)) => (end - start).max(0),
            _ => 0,
        };
        let legs_filled = trade
            .legs
            .iter()
            .filter(|l| l.status == crate::opportunity::LegStatus::Filled)
            .count();
        let slippage_pct = match (trade.expected_profit, trade.actual_profit) {
            (Some(expected), Some(actual)) if expected != rust_decimal::Decimal::ZERO => {
                Some(to_f64((expected - actual).abs() / expected))
            }
            _ => None,
        };
        let leg_execution_times_ms = trade
            .legs
            .iter()
            .filter_map(|l| match (l.submission_ts, l.fill_ts) {
                (Some(s), Some(f)) => Some((f - s).max(0)),
                _ => None,
            })
            .collect();
        let leg_statuses = trade
            .legs
            .iter()
            .map(|l| format!("{:?}", l.status))
            .collect();
        let errors = trade
            .legs
            .iter()
            .filter_map(|l| l.error.as_ref().map(|e| format!("{}: {e}", l.market_id)))
            .collect();

        Self {
            trade_id: trade.trade_id.clone(),
            timestamp_ms: now_ms,
            strategy: trade.strategy,
            num_legs: trade.legs.len(),
            legs_filled,
            execution_time_ms,
            committed: trade.committed,
            rolled_back: trade.rolled_back,
            expected_profit: trade.expected_profit,
            actual_profit: trade.actual_profit,
            slippage_pct,
            leg_execution_times_ms,
            leg_statuses,
            errors,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StrategyAccumulator {
    count: u64,
    successful: u64,
    within_block: u64,
    total_exec_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct StrategySummary {
    pub count: u64,
    pub successful: u64,
    pub success_rate: f64,
    pub within_block_rate: f64,
    pub avg_execution_time_ms: f64,
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub total: u64,
    pub successful: u64,
    pub rolled_back: u64,
    pub within_block_rate: f64,
    pub p50_exec_ms: i64,
    pub p95_exec_ms: i64,
    pub p99_exec_ms: i64,
    pub profit_capture_rate: f64,
    pub by_strategy: HashMap<String, StrategySummary>,
}

/// Append-only interface serialized through a single owner. Internally
/// a `parking_lot::Mutex` gates both the ring and the running aggregates so
/// `record` is the only write path.
pub struct MetricsRecorder {
    inner: Mutex<Inner>,
}

struct Inner {
    ring: VecDeque<ExecutionMetrics>,
    total: u64,
    successful: u64,
    rolled_back: u64,
    within_block: u64,
    total_expected_profit: f64,
    total_actual_profit: f64,
    by_strategy: HashMap<&'static str, StrategyAccumulator>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(RING_CAPACITY),
                total: 0,
                successful: 0,
                rolled_back: 0,
                within_block: 0,
                total_expected_profit: 0.0,
                total_actual_profit: 0.0,
                by_strategy: HashMap::new(),
            }),
        }
    }

    /// Record a finalized trade, returning its per-trade metrics record.
    pub fn record(&self, trade: &MultiLegTrade, now_ms: i64) -> ExecutionMetrics {
        let metrics = ExecutionMetrics::from_trade(trade, now_ms);
        let mut inner = self.inner.lock();

        inner.total += 1;
        if metrics.success() {
            inner.successful += 1;
        }
        if metrics.rolled_back {
            inner.rolled_back += 1;
        }
        if metrics.within_block() {
            inner.within_block += 1;
        }
        if let Some(expected) = metrics.expected_profit {
            inner.total_expected_profit += to_f64(expected);
        }
        if let Some(actual) = metrics.actual_profit {
            inner.total_actual_profit += to_f64(actual);
        }

        let strategy_key = strategy_key(metrics.strategy);
        let acc = inner.by_strategy.entry(strategy_key).or_default();
        acc.count += 1;
        if metrics.success() {
            acc.successful += 1;
        }
        if metrics.within_block() {
            acc.within_block += 1;
        }
        acc.total_exec_time_ms += metrics.execution_time_ms;

        metrics::gauge!("arb_execution_time_ms", metrics.execution_time_ms as f64);
        metrics::histogram!("arb_fill_rate", metrics.fill_rate());

        if inner.ring.len() >= RING_CAPACITY {
            inner.ring.pop_front();
        }
        inner.ring.push_back(metrics.clone());

        tracing::info!(
            trade_id = %metrics.trade_id,
            strategy = ?metrics.strategy,
            legs_filled = metrics.legs_filled,
            num_legs = metrics.num_legs,
            execution_time_ms = metrics.execution_time_ms,
            committed = metrics.committed,
            rolled_back = metrics.rolled_back,
            "trade recorded"
        );

        metrics
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        let mut exec_times: Vec<i64> = inner.ring.iter().map(|m| m.execution_time_ms).collect();
        exec_times.sort_unstable();

        let profit_capture_rate = if inner.total_expected_profit != 0.0 {
            inner.total_actual_profit / inner.total_expected_profit
        } else {
            0.0
        };

        let by_strategy = inner
            .by_strategy
            .iter()
            .map(|(name, acc)| {
                (
                    name.to_string(),
                    StrategySummary {
                        count: acc.count,
                        successful: acc.successful,
                        success_rate: ratio(acc.successful, acc.count),
                        within_block_rate: ratio(acc.within_block, acc.count),
                        avg_execution_time_ms: if acc.count > 0 {
                            acc.total_exec_time_ms as f64 / acc.count as f64
                        } else {
                            0.0
                        },
                    },
                )
            })
            .collect();

        MetricsSummary {
            total: inner.total,
            successful: inner.successful,
            rolled_back: inner.rolled_back,
            within_block_rate: ratio(inner.within_block, inner.total),
            p50_exec_ms: percentile(&exec_times, 0.50),
            p95_exec_ms: percentile(&exec_times, 0.95),
            p99_exec_ms: percentile(&exec_times, 0.99),
            profit_capture_rate,
            by_strategy,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn strategy_key(strategy: ExecutionStrategy) -> &'static str {
    match strategy {
        ExecutionStrategy::Market => "market",
        ExecutionStrategy::Limit => "limit",
        ExecutionStrategy::Hybrid => "hybrid",
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p * sorted.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[idx]
}
