// src/connectors/traits.rs
use crate::connectors::messages::Channel;
use crate::error::Result;
use crate::orderbook::BookSnapshot;
use crate::types::{
    Balance, ExchangePosition, ExecutionReport, Fill, MarketInfo, OpenOrder, OrderFlags, Side,
    TargetPosition,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: u64,
    pub market: String,
    pub status: String,
}

/// Request/response order capability, stateless per call. One concrete REST
/// implementation exists; tests provide a simulated exchange.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(
        &self,
        market: &str,
        side: Side,
        price: Option<Decimal>,
        size: Decimal,
        order_type: &str,
        flags: OrderFlags,
        client_id: Option<&str>,
    ) -> Result<OrderAck>;

    async fn cancel_orders(&self, market: &str) -> Result<()>;

    async fn open_orders(&self, market: &str) -> Result<Vec<OpenOrder>>;

    async fn orderbook_snapshot(&self, market: &str, depth: u32) -> Result<BookSnapshot>;

    async fn balances(&self) -> Result<Vec<Balance>>;

    async fn positions(&self) -> Result<Vec<ExchangePosition>>;

    async fn markets(&self) -> Result<Vec<MarketInfo>>;

    /// Total account value in USD, summed over the USD value of balances.
    /// Perp payouts reflect in USD balances, so no extra position term.
    async fn account_value(&self) -> Result<Decimal> {
        Ok(self.balances().await?.iter().map(|b| b.usd_value).sum())
    }

    /// Signed USD notional per holding: coins by their USD value, perps by
    /// their position cost.
    async fn notional_exposures(&self) -> Result<HashMap<String, Decimal>> {
        let mut notionals = HashMap::new();
        for balance in self.balances().await? {
            notionals.insert(balance.coin, balance.usd_value);
        }
        for position in self.positions().await? {
            notionals.insert(position.future, position.cost);
        }
        Ok(notionals)
    }
}

/// Read-only view over live streamed state. The stream client's receive task
/// is the only writer; these calls return copies or park on a notification.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn subscribe(&self, channel: Channel, market: Option<&str>) -> Result<()>;

    async fn unsubscribe(&self, channel: Channel, market: Option<&str>) -> Result<()>;

    fn order_book(&self, market: &str) -> Option<BookSnapshot>;

    fn open_orders(&self, market: &str) -> Vec<OpenOrder>;

    fn fills(&self) -> Vec<Fill>;

    /// Blocks until the next checksum-verified book update for `market`, or
    /// the timeout elapses. Returns false on timeout.
    async fn wait_for_orderbook_update(&self, market: &str, timeout: Duration) -> bool;

    /// Blocks until the next open-order table change for `market`, or the
    /// timeout elapses. Returns false on timeout.
    async fn wait_for_order_update(&self, market: &str, timeout: Duration) -> bool;
}

/// External persistence for target positions and execution results.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn fetch_unfilled(&self) -> Result<Vec<TargetPosition>>;

    async fn mark_processed(&self, ids: &[i64]) -> Result<()>;

    async fn record_report(&self, report: &ExecutionReport) -> Result<()>;
}
