//! Executable pricer.
//!
//! Ported from `estimate_executable_price` / `OrderbookExecutablePricer` in
//! the original `arbitrage_v1_plumbing.py`: walk depth on the consumed side,
//! accumulate notional and filled quantity level by level, derive VWAP and
//! slippage against a reference price. Pure function of a snapshot and a
//! request — never mutates the store.

use crate::book_store::OrderBookSnapshot;
use crate::decimal::{slippage_bps, Price, Qty, ONE, ZERO};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

#[derive(Debug, Clone)]
pub struct ExecutablePrice {
    pub market_id: String,
    pub side: Side,
    pub target_qty: Qty,
    pub quoted_price: Price,
    pub executable_price: Price,
    pub slippage_bps: i64,
    pub filled_qty: Qty,
    pub depth_levels_used: u32,
    pub snapshot_age_ms: i64,
    pub is_stale: bool,
    pub liquidity_sufficient: bool,
}

/// YES consumes asks ascending; NO consumes bids descending. Returns the raw
/// VWAP/filled/depth for whichever side was walked; both `estimate` and
/// `estimate_complement` invert a NO walk's VWAP to `1 - vwap` themselves.
fn walk(levels: &[crate::book_store::Level], target_qty: Qty) -> (Price, Qty, u32) {
    let mut remaining = target_qty;
    let mut notional = ZERO;
    let mut filled = ZERO;
    let mut depth_used = 0u32;
    for level in levels {
        if remaining <= ZERO {
            break;
        }
        let take = remaining.min(level.size);
        notional += take * level.price;
        filled += take;
        remaining -= take;
        depth_used += 1;
    }
    let vwap = if filled > ZERO { notional / filled } else { ZERO };
    (vwap, filled, depth_used)
}

/// Estimate the executable VWAP for buying `side` at `target_qty` against
/// `snapshot`. `quoted_price`, when given, is the reference for slippage;
/// otherwise the best level on the consumed side is used.
pub fn estimate(
    market_id: &str,
    side: Side,
    target_qty: Qty,
    snapshot: &OrderBookSnapshot,
    quoted_price: Option<Price>,
    now_ms: i64,
    stale_after_ms: i64,
) -> ExecutablePrice {
    let levels: &[crate::book_store::Level] = match side {
        Side::Yes => &snapshot.asks,
        Side::No => &snapshot.bids,
    };
    let (raw_vwap, filled, depth_used) = walk(levels, target_qty);
    // NO consumes bids, but a NO buy's price is the complement of the
    // YES-sell walk on those same bids: invert to `1 - vwap` (and the
    // reference to `1 - best_bid`), matching estimate_complement's
    // derivation so a re-measure of an already-priced NO leg agrees with it.
    let executable_price = match side {
        Side::Yes => raw_vwap,
        Side::No => {
            if filled > ZERO {
                ONE - raw_vwap
            } else {
                ZERO
            }
        }
    };
    let reference = quoted_price.unwrap_or_else(|| {
        levels
            .first()
            .map(|l| match side {
                Side::Yes => l.price,
                Side::No => ONE - l.price,
            })
            .unwrap_or(ZERO)
    });
    let snapshot_age_ms = snapshot.staleness_ms(now_ms);
    ExecutablePrice {
        market_id: market_id.to_string(),
        side,
        target_qty,
        quoted_price: reference,
        executable_price,
        slippage_bps: slippage_bps(executable_price, reference),
        filled_qty: filled,
        depth_levels_used: depth_used,
        snapshot_age_ms,
        is_stale: snapshot_age_ms > stale_after_ms,
        liquidity_sufficient: filled == target_qty,
    }
}

#[derive(Debug, Clone)]
pub struct ComplementPricing {
    pub yes_buy: ExecutablePrice,
    pub no_buy: ExecutablePrice,
    pub total_cost: Price,
    pub predicted_slippage_bps: i64,
}

/// Binary-complement pricing: YES buy walks asks; NO buy walks bids and
/// inverts to `1 - vwap_yes_sell` via the same `estimate` used for a
/// standalone NO-side estimate, so a later re-measure of either leg agrees
/// with the value attached here. The executor never recomputes this
/// relationship itself, it only ever sees the two already-priced legs below.
pub fn estimate_complement(
    market_id: &str,
    target_qty: Qty,
    snapshot: &OrderBookSnapshot,
    now_ms: i64,
    stale_after_ms: i64,
) -> ComplementPricing {
    let yes_buy = estimate(
        market_id,
        Side::Yes,
        target_qty,
        snapshot,
        None,
        now_ms,
        stale_after_ms,
    );

    let no_buy = estimate(
        market_id,
        Side::No,
        target_qty,
        snapshot,
        None,
        now_ms,
        stale_after_ms,
    );

    let total_cost = yes_buy.executable_price + no_buy.executable_price;
    let predicted_slippage_bps = yes_buy.slippage_bps.max(no_buy.slippage_bps);

    ComplementPricing {
        yes_buy,
        no_buy,
        total_cost,
        predicted_slippage_bps,
    }
}
