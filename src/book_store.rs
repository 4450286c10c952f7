//! Order-book snapshot store.
//!
//! Grounded on the ArcSwap / per-asset single-writer pattern in
//! `scrapers/polymarket_book_store.rs`: each asset gets its own lock-free
//! slot so readers (the pricer) never block the writer (the feed adapter),
//! and a late/duplicate snapshot is rejected by comparing timestamps rather
//! than trusting arrival order.

use crate::decimal::{Price, Qty};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level {
    pub price: Price,
    pub size: Qty,
}

impl Level {
    pub fn new(price: Price, size: Qty) -> Self {
        Self { price, size }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub market_id: String,
    pub asset_id: String,
    /// Strictly descending by price.
    pub bids: Vec<Level>,
    /// Strictly ascending by price.
    pub asks: Vec<Level>,
    /// Epoch milliseconds, monotonic per asset.
    pub timestamp: i64,
    pub sequence_hash: u64,
}

impl OrderBookSnapshot {
    pub fn empty(market_id: impl Into<String>, asset_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            market_id: market_id.into(),
            asset_id: asset_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp,
            sequence_hash: 0,
        }
    }

    /// Bids strictly descending, asks strictly ascending, all prices in
    /// [0, 1]. Violating this is a caller bug, not a runtime condition the
    /// store tries to repair.
    pub fn is_well_formed(&self) -> bool {
        let bids_ok = self
            .bids
            .windows(2)
            .all(|w| w[0].price > w[1].price)
            && self.bids.iter().all(|l| l.price >= crate::decimal::ZERO && l.price <= crate::decimal::ONE && l.size > crate::decimal::ZERO);
        let asks_ok = self
            .asks
            .windows(2)
            .all(|w| w[0].price < w[1].price)
            && self.asks.iter().all(|l| l.price >= crate::decimal::ZERO && l.price <= crate::decimal::ONE && l.size > crate::decimal::ZERO);
        bids_ok && asks_ok
    }

    pub fn staleness_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp).max(0)
    }

    fn upsert_bid(&mut self, price: Price, size: Qty) {
        upsert_level(&mut self.bids, price, size, true);
    }

    fn upsert_ask(&mut self, price: Price, size: Qty) {
        upsert_level(&mut self.asks, price, size, false);
    }
}

fn upsert_level(levels: &mut Vec<Level>, price: Price, size: Qty, descending: bool) {
    if size <= crate::decimal::ZERO {
        levels.retain(|l| l.price != price);
        return;
    }
    match levels.iter_mut().find(|l| l.price == price) {
        Some(existing) => existing.size = size,
        None => levels.push(Level::new(price, size)),
    }
    if descending {
        levels.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        levels.sort_by(|a, b| a.price.cmp(&b.price));
    }
}

pub enum Side {
    Bid,
    Ask,
}

/// Lock-free, per-asset single-writer snapshot store.
///
/// Each asset's slot is an `ArcSwap<OrderBookSnapshot>`; readers call
/// `load_full` (a cheap `Arc` clone) with no lock contention. Writes go
/// through a `Mutex<()>` gate per asset only to serialize delta application
/// against itself — applying snapshots/deltas from one feed is expected to
/// be single-threaded in practice, but the gate makes that an enforced
/// invariant rather than an assumption.
#[derive(Default)]
pub struct SnapshotStore {
    slots: parking_lot::RwLock<HashMap<String, Arc<ArcSwap<OrderBookSnapshot>>>>,
    write_gates: parking_lot::RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, asset_id: &str) -> Arc<ArcSwap<OrderBookSnapshot>> {
        if let Some(slot) = self.slots.read().get(asset_id) {
            return slot.clone();
        }
        let mut slots = self.slots.write();
        slots
            .entry(asset_id.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(OrderBookSnapshot::empty("", asset_id, 0))))
            .clone()
    }

    fn gate(&self, asset_id: &str) -> Arc<Mutex<()>> {
        if let Some(gate) = self.write_gates.read().get(asset_id) {
            return gate.clone();
        }
        let mut gates = self.write_gates.write();
        gates
            .entry(asset_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current snapshot for an asset, if one has ever arrived.
    pub fn get(&self, asset_id: &str) -> Option<Arc<OrderBookSnapshot>> {
        let slots = self.slots.read();
        let slot = slots.get(asset_id)?;
        let snapshot = slot.load_full();
        if snapshot.timestamp == 0 && snapshot.bids.is_empty() && snapshot.asks.is_empty() {
            None
        } else {
            Some(snapshot)
        }
    }

    /// Replace the full state for `snapshot.asset_id`. Rejected (no-op) if
    /// `snapshot.timestamp` is not newer than the currently installed one —
    /// this is what makes re-applying the same snapshot idempotent.
    pub fn apply_snapshot(&self, snapshot: OrderBookSnapshot) {
        let gate = self.gate(&snapshot.asset_id);
        let _guard = gate.lock();
        let slot = self.slot(&snapshot.asset_id);
        let current = slot.load();
        if snapshot.timestamp <= current.timestamp && current.timestamp != 0 {
            tracing::debug!(
                asset_id = %snapshot.asset_id,
                incoming_ts = snapshot.timestamp,
                current_ts = current.timestamp,
                "dropping stale or duplicate snapshot"
            );
            return;
        }
        slot.store(Arc::new(snapshot));
    }

    /// Upsert or remove one level in the working snapshot for `asset_id`.
    /// `size == 0` removes the level. No-op if no snapshot has been applied
    /// yet (a delta can't create a book from nothing).
    pub fn apply_delta(&self, asset_id: &str, side: Side, price: Price, size: Qty, timestamp: i64) {
        let gate = self.gate(asset_id);
        let _guard = gate.lock();
        let slot = self.slot(asset_id);
        let current = slot.load();
        if current.timestamp == 0 && current.bids.is_empty() && current.asks.is_empty() {
            return;
        }
        if timestamp < current.timestamp {
            return;
        }
        let mut next = (**current).clone();
        next.timestamp = timestamp;
        match side {
            Side::Bid => next.upsert_bid(price, size),
            Side::Ask => next.upsert_ask(price, size),
        }
        slot.store(Arc::new(next));
    }

    pub fn staleness_ms(&self, asset_id: &str, now_ms: i64) -> Option<i64> {
        self.get(asset_id).map(|s| s.staleness_ms(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap(ts: i64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            market_id: "m1".into(),
            asset_id: "a1".into(),
            bids: vec![Level::new(dec!(0.52), dec!(100))],
            asks: vec![Level::new(dec!(0.53), dec!(100))],
            timestamp: ts,
            sequence_hash: 1,
        }
    }

    #[test]
    fn missing_asset_yields_none() {
        let store = SnapshotStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn apply_snapshot_then_get() {
        let store = SnapshotStore::new();
        store.apply_snapshot(snap(1000));
        let got = store.get("a1").unwrap();
        assert_eq!(got.timestamp, 1000);
    }

    #[test]
    fn reapplying_same_snapshot_is_noop() {
        let store = SnapshotStore::new();
        store.apply_snapshot(snap(1000));
        store.apply_snapshot(snap(1000));
        let got = store.get("a1").unwrap();
        assert_eq!(got.timestamp, 1000);
    }

    #[test]
    fn older_snapshot_rejected() {
        let store = SnapshotStore::new();
        store.apply_snapshot(snap(1000));
        store.apply_snapshot(snap(500));
        let got = store.get("a1").unwrap();
        assert_eq!(got.timestamp, 1000);
    }

    #[test]
    fn delta_zero_size_removes_level() {
        let store = SnapshotStore::new();
        store.apply_snapshot(snap(1000));
        store.apply_delta("a1", Side::Bid, dec!(0.52), dec!(0), 1001);
        let got = store.get("a1").unwrap();
        assert!(got.bids.is_empty());
    }

    #[test]
    fn well_formed_ordering() {
        let s = snap(1000);
        assert!(s.is_well_formed());
    }
}
