//! Venue adapter capability interfaces.
//!
//! Everything outside the nine core components is an external collaborator.
//! This is the one boundary where dynamic dispatch is appropriate — the
//! concrete adapter (Polymarket CLOB client, an exchange REST/WS client, a
//! paper-trading simulator for tests) is supplied by the orchestrator.
//! Shaped after `vault/execution.rs`'s `ExecutionAdapter` trait and
//! `OrderRequest`/`OrderAck` pair, generalized from a single-order call to
//! a full cancel/poll/balance surface.

use crate::book_store::OrderBookSnapshot;
use crate::decimal::{Price, Qty, Usd};
use crate::error::VenueError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// FILLED iff `filled_qty >= target_qty`; OPEN/PARTIALLY_FILLED count as
    /// pending; CANCELLED/EXPIRED count as failed.
    pub fn is_pending(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Expired)
    }
}

#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub order_id: String,
    pub market_id: String,
}

#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub filled_qty: Qty,
    pub avg_fill_price: Option<Price>,
}

/// A single venue's trading + market-data surface. Implementors live
/// outside this crate (Polygon CLOB client, exchange REST/WS client, or a
/// paper adapter for tests).
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), VenueError>;
    async fn disconnect(&self);

    async fn get_balance(&self) -> Result<Usd, VenueError>;
    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBookSnapshot, VenueError>;

    async fn place_order(
        &self,
        market_id: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Qty,
        price: Option<Price>,
    ) -> Result<OrderHandle, VenueError>;

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<bool, VenueError>;

    async fn get_order(&self, handle: &OrderHandle) -> Result<OrderUpdate, VenueError>;
}
