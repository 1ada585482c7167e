// src/core/executor.rs
use crate::connectors::messages::Channel;
use crate::connectors::traits::{ExchangeGateway, MarketData};
use crate::error::{ChaserError, Result};
use crate::orderbook::BookSnapshot;
use crate::types::{ExecutionReport, Fill, OrderFlags, Side, SizeUnit};
use crate::utils::precision::{normalize_price, normalize_quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Depth requested for the pre-trade REST snapshot; the exchange serves at
/// most 100 levels.
const PROJECTION_DEPTH: u32 = 100;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Minimum spacing between re-quote evaluations.
    pub poll_interval: Duration,
    /// How long to wait for the first verified book snapshot.
    pub first_book_timeout: Duration,
    /// How long to wait for the open-order table to drain after a cancel.
    pub cancel_timeout: Duration,
    /// Hard wall-clock cap on one chase session.
    pub max_session: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            first_book_timeout: Duration::from_secs(10),
            cancel_timeout: Duration::from_secs(5),
            max_session: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FillRequest {
    pub market: String,
    pub side: Side,
    pub size: Decimal,
    pub unit: SizeUnit,
    pub aggression: Decimal,
    pub flags: OrderFlags,
    pub client_id: Option<String>,
}

/// Everything one `fill_limit_order` call needs, constructed at call start
/// and discarded at return. Sessions on different markets never share state.
struct Session {
    market: String,
    side: Side,
    target_base: Decimal,
    ordered_quantity: Decimal,
    unit: SizeUnit,
    /// Mid price used for quote-to-base conversion at session start.
    conversion_mid: Decimal,
    weight_bid: Decimal,
    weight_ask: Decimal,
    reference_price: Decimal,
    /// Fills at or after this instant belong to the session; attribution by
    /// timestamp survives eviction from the bounded fill log.
    start_time: DateTime<Utc>,
    started: Instant,
    min_size: Decimal,
    price_increment: Decimal,
    size_increment: Decimal,
    flags: OrderFlags,
    client_id: Option<String>,
}

/// Drives one limit order to completion by chasing the quoted price.
pub struct ExecutionEngine<M, G> {
    stream: Arc<M>,
    gateway: Arc<G>,
    config: ExecutorConfig,
}

impl<M: MarketData, G: ExchangeGateway> ExecutionEngine<M, G> {
    pub fn new(stream: Arc<M>, gateway: Arc<G>, config: ExecutorConfig) -> Self {
        Self {
            stream,
            gateway,
            config,
        }
    }

    /// Places and re-quotes a limit order until the target size is filled,
    /// the size drops below the market minimum, or the session deadline hits.
    pub async fn fill_limit_order(&self, request: FillRequest) -> Result<ExecutionReport> {
        if request.aggression <= Decimal::ZERO || request.aggression >= Decimal::ONE {
            return Err(ChaserError::Configuration(format!(
                "aggression must be strictly between 0 and 1, got {}",
                request.aggression
            )));
        }

        let market_info = self
            .gateway
            .markets()
            .await?
            .into_iter()
            .find(|m| m.name == request.market)
            .ok_or_else(|| {
                ChaserError::Configuration(format!("unknown market {}", request.market))
            })?;

        self.stream
            .subscribe(Channel::Orderbook, Some(&request.market))
            .await?;
        self.stream.subscribe(Channel::Orders, None).await?;
        self.stream.subscribe(Channel::Fills, None).await?;

        let result = self.run_session(&request, &market_info).await;

        // Book data is per-session; account channels stay up for the client.
        self.stream
            .unsubscribe(Channel::Orderbook, Some(&request.market))
            .await?;
        result
    }

    async fn run_session(
        &self,
        request: &FillRequest,
        market_info: &crate::types::MarketInfo,
    ) -> Result<ExecutionReport> {
        let first_book = self.await_first_snapshot(&request.market).await?;
        let (best_bid, best_ask) = match (first_book.best_bid(), first_book.best_ask()) {
            (Some(b), Some(a)) => (b, a),
            _ => {
                return Err(ChaserError::Connectivity(format!(
                    "one-sided book for {}",
                    request.market
                )))
            }
        };
        let mid = (best_bid + best_ask) / Decimal::TWO;

        let target_base = match request.unit {
            SizeUnit::Base => request.size,
            SizeUnit::Quote => request.size / mid,
        };
        if target_base < market_info.min_provide_size {
            return Err(ChaserError::SizeTooSmall {
                market: request.market.clone(),
                size: target_base,
                min_size: market_info.min_provide_size,
            });
        }

        // Higher aggression biases the quote toward the far side of the book:
        // closer fills, worse price.
        let (weight_bid, weight_ask) = match request.side {
            Side::Buy => (Decimal::ONE - request.aggression, request.aggression),
            Side::Sell => (request.aggression, Decimal::ONE - request.aggression),
        };

        let mut session = Session {
            market: request.market.clone(),
            side: request.side,
            target_base,
            ordered_quantity: request.size,
            unit: request.unit,
            conversion_mid: mid,
            weight_bid,
            weight_ask,
            reference_price: match request.side {
                Side::Buy => best_ask,
                Side::Sell => best_bid,
            },
            start_time: Utc::now(),
            started: Instant::now(),
            min_size: market_info.min_provide_size,
            price_increment: market_info.price_increment,
            size_increment: market_info.size_increment,
            flags: request.flags,
            client_id: request.client_id.clone(),
        };

        self.warn_if_high_slippage(&session).await;

        let quoted = self.quoted_price(&session, best_bid, best_ask);
        self.place(&session, quoted, session.target_base).await?;
        self.chase(&mut session).await?;
        self.report(&session)
    }

    /// Projects the damage of sweeping the target size through the REST book
    /// snapshot before the chase starts. Advisory only: projection failures
    /// never block the session.
    async fn warn_if_high_slippage(&self, session: &Session) {
        let snapshot = match self
            .gateway
            .orderbook_snapshot(&session.market, PROJECTION_DEPTH)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(market = %session.market, "slippage projection skipped: {e}");
                return;
            }
        };
        match project_slippage(&snapshot, session.side, session.target_base) {
            Some((projected_avg, projected_slippage, _)) => {
                debug!(
                    market = %session.market,
                    %projected_avg,
                    %projected_slippage,
                    "pre-trade slippage projection"
                );
            }
            None => {
                warn!(
                    market = %session.market,
                    size = %session.target_base,
                    "order would clear the visible book depth"
                );
            }
        }
    }

    async fn await_first_snapshot(&self, market: &str) -> Result<BookSnapshot> {
        let deadline = Instant::now() + self.config.first_book_timeout;
        loop {
            if let Some(snapshot) = self.stream.order_book(market) {
                if snapshot.best_bid().is_some() && snapshot.best_ask().is_some() {
                    return Ok(snapshot);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChaserError::Connectivity(format!(
                    "no verified orderbook snapshot for {market} within {:?}",
                    self.config.first_book_timeout
                )));
            }
            self.stream.wait_for_orderbook_update(market, remaining).await;
        }
    }

    fn quoted_price(&self, session: &Session, bid: Decimal, ask: Decimal) -> Decimal {
        normalize_price(
            bid * session.weight_bid + ask * session.weight_ask,
            session.price_increment,
        )
    }

    async fn place(&self, session: &Session, price: Decimal, size: Decimal) -> Result<()> {
        let size = normalize_quantity(size, session.size_increment);
        info!(
            market = %session.market,
            side = session.side.as_str(),
            %price,
            %size,
            "placing limit order"
        );
        self.gateway
            .place_order(
                &session.market,
                session.side,
                Some(price),
                size,
                "limit",
                session.flags,
                session.client_id.as_deref(),
            )
            .await?;
        Ok(())
    }

    /// Fills observed for this session so far, in base units.
    fn session_fills(&self, session: &Session) -> Vec<Fill> {
        self.stream
            .fills()
            .into_iter()
            .filter(|f| f.market == session.market && f.time >= session.start_time)
            .collect()
    }

    fn remaining(&self, session: &Session) -> Decimal {
        let filled: Decimal = self.session_fills(session).iter().map(|f| f.size).sum();
        session.target_base - filled
    }

    async fn chase(&self, session: &mut Session) -> Result<()> {
        loop {
            // Wakes on any fill/order event, or after the poll interval;
            // either way we never evaluate faster than the throttle.
            self.stream
                .wait_for_order_update(&session.market, self.config.poll_interval)
                .await;

            if self.remaining(session) <= session.min_size {
                return Ok(());
            }
            if session.started.elapsed() >= self.config.max_session {
                warn!(market = %session.market, "session deadline hit, cancelling chase");
                self.gateway.cancel_orders(&session.market).await?;
                self.await_orders_drained(session).await?;
                return Ok(());
            }

            let open = self.stream.open_orders(&session.market);
            if open.len() > 1 {
                // Anomaly only: keep chasing, the cancel path clears them all.
                warn!(
                    market = %session.market,
                    count = open.len(),
                    "multiple orders open at once"
                );
                continue;
            }

            let snapshot = match self.stream.order_book(&session.market) {
                Some(s) => s,
                None => continue, // resyncing after a checksum drop
            };
            let (bid, ask) = match (snapshot.best_bid(), snapshot.best_ask()) {
                (Some(b), Some(a)) => (b, a),
                _ => continue,
            };
            let quoted = self.quoted_price(session, bid, ask);

            match open.first() {
                Some(order) if order.price == quoted => {
                    // Price has not moved enough to re-quote.
                    continue;
                }
                Some(_) => {
                    self.gateway.cancel_orders(&session.market).await?;
                    self.await_orders_drained(session).await?;
                    let remaining = self.remaining(session);
                    if remaining <= session.min_size {
                        return Ok(());
                    }
                    self.place(session, quoted, remaining).await?;
                }
                None => {
                    // No resting order visible. Confirm over REST before
                    // placing again so we never double up on a market.
                    if !self.gateway.open_orders(&session.market).await?.is_empty() {
                        continue;
                    }
                    let remaining = self.remaining(session);
                    if remaining <= session.min_size {
                        return Ok(());
                    }
                    self.place(session, quoted, remaining).await?;
                }
            }
        }
    }

    /// Waits for the open-order table to confirm there is nothing resting,
    /// bounded by the cancel timeout.
    async fn await_orders_drained(&self, session: &Session) -> Result<()> {
        let deadline = Instant::now() + self.config.cancel_timeout;
        while !self.stream.open_orders(&session.market).is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChaserError::Connectivity(format!(
                    "cancel for {} not confirmed within {:?}",
                    session.market, self.config.cancel_timeout
                )));
            }
            self.stream
                .wait_for_order_update(&session.market, remaining)
                .await;
        }
        Ok(())
    }

    fn report(&self, session: &Session) -> Result<ExecutionReport> {
        let fills = self.session_fills(session);
        let filled_base: Decimal = fills.iter().map(|f| f.size).sum();
        if fills.is_empty() || filled_base.is_zero() {
            return Err(ChaserError::NoFill {
                market: session.market.clone(),
            });
        }
        let notional: Decimal = fills.iter().map(|f| f.size * f.price).sum();
        let fill_average_price = notional / filled_base;
        let slippage_ratio = match session.side {
            Side::Buy => fill_average_price / session.reference_price - Decimal::ONE,
            Side::Sell => Decimal::ONE - fill_average_price / session.reference_price,
        };
        let unfilled_base = (session.target_base - filled_base).max(Decimal::ZERO);
        let unfilled_quantity = match session.unit {
            SizeUnit::Base => unfilled_base,
            SizeUnit::Quote => unfilled_base * session.conversion_mid,
        };
        info!(
            market = %session.market,
            %fill_average_price,
            %slippage_ratio,
            fills = fills.len(),
            "✅ execution session complete"
        );
        Ok(ExecutionReport {
            market: session.market.clone(),
            start_time: session.start_time,
            end_time: Utc::now(),
            reference_price: session.reference_price,
            fill_average_price,
            slippage_ratio,
            fills,
            ordered_quantity: session.ordered_quantity,
            quantity_unit: session.unit,
            unfilled_quantity,
            order_type: "LIMIT".to_string(),
        })
    }
}

/// Average fill price, slippage ratio and best price if `size` base units
/// were swept through the visible book right now. `None` when the size
/// exceeds the depth on the relevant side.
fn project_slippage(
    snapshot: &BookSnapshot,
    side: Side,
    size: Decimal,
) -> Option<(Decimal, Decimal, Decimal)> {
    let depth = match side {
        Side::Buy => &snapshot.asks,
        Side::Sell => &snapshot.bids,
    };
    let best_price = depth.first().map(|(price, _)| *price)?;
    let available: Decimal = depth.iter().map(|(_, level)| *level).sum();
    if size > available || size.is_zero() {
        return None;
    }
    let mut remaining = size;
    let mut cost = Decimal::ZERO;
    for (price, level) in depth {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(*level);
        cost += take * price;
        remaining -= take;
    }
    let average = cost / size;
    let slippage = match side {
        Side::Buy => average / best_price - Decimal::ONE,
        Side::Sell => Decimal::ONE - average / best_price,
    };
    Some((average, slippage, best_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::traits::OrderAck;
    use crate::types::{Balance, ExchangePosition, MarketInfo, OpenOrder, OrderStatus};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FillBehavior {
        /// Every placed order fills instantly at its limit price.
        Immediate,
        /// Orders rest until enough placements have happened; resting shifts
        /// the book one tick to force a re-quote.
        RestThenFill { placements_before_fill: usize },
    }

    struct SimState {
        bid: Decimal,
        ask: Decimal,
        open_orders: HashMap<u64, OpenOrder>,
        fills: Vec<Fill>,
        placements: Vec<(Decimal, Decimal)>, // (price, size)
        cancels: usize,
        next_id: u64,
    }

    /// In-process exchange: one market, deterministic fills, no sockets.
    struct SimExchange {
        state: Mutex<SimState>,
        behavior: FillBehavior,
        /// Added to the quoted price when filling, to steer slippage tests.
        fill_offset: Decimal,
        min_size: Decimal,
    }

    impl SimExchange {
        fn new(bid: Decimal, ask: Decimal, behavior: FillBehavior) -> Self {
            Self {
                state: Mutex::new(SimState {
                    bid,
                    ask,
                    open_orders: HashMap::new(),
                    fills: Vec::new(),
                    placements: Vec::new(),
                    cancels: 0,
                    next_id: 1,
                }),
                behavior,
                fill_offset: Decimal::ZERO,
                min_size: dec!(0.001),
            }
        }

        fn with_fill_offset(mut self, offset: Decimal) -> Self {
            self.fill_offset = offset;
            self
        }

        fn fill_at(state: &mut SimState, market: &str, side: Side, price: Decimal, size: Decimal) {
            state.fills.push(Fill {
                market: market.to_string(),
                side,
                size,
                price,
                fee: Decimal::ZERO,
                time: Utc::now(),
            });
        }
    }

    #[async_trait::async_trait]
    impl MarketData for SimExchange {
        async fn subscribe(&self, _c: Channel, _m: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _c: Channel, _m: Option<&str>) -> Result<()> {
            Ok(())
        }
        fn order_book(&self, _market: &str) -> Option<BookSnapshot> {
            let state = self.state.lock().unwrap();
            Some(BookSnapshot {
                bids: vec![(state.bid, dec!(100))],
                asks: vec![(state.ask, dec!(100))],
                time: 1.0,
            })
        }
        fn open_orders(&self, _market: &str) -> Vec<OpenOrder> {
            self.state.lock().unwrap().open_orders.values().cloned().collect()
        }
        fn fills(&self) -> Vec<Fill> {
            self.state.lock().unwrap().fills.clone()
        }
        async fn wait_for_orderbook_update(&self, _m: &str, _t: Duration) -> bool {
            true
        }
        async fn wait_for_order_update(&self, _m: &str, _t: Duration) -> bool {
            tokio::task::yield_now().await;
            true
        }
    }

    #[async_trait::async_trait]
    impl ExchangeGateway for SimExchange {
        async fn place_order(
            &self,
            market: &str,
            side: Side,
            price: Option<Decimal>,
            size: Decimal,
            _order_type: &str,
            _flags: OrderFlags,
            _client_id: Option<&str>,
        ) -> Result<OrderAck> {
            let mut state = self.state.lock().unwrap();
            let price = price.expect("engine always quotes a price");
            state.placements.push((price, size));
            let id = state.next_id;
            state.next_id += 1;
            let placements = state.placements.len();
            let fills_now = match self.behavior {
                FillBehavior::Immediate => true,
                FillBehavior::RestThenFill {
                    placements_before_fill,
                } => placements > placements_before_fill,
            };
            if fills_now {
                Self::fill_at(&mut state, market, side, price + self.fill_offset, size);
            } else {
                state.open_orders.insert(
                    id,
                    OpenOrder {
                        id,
                        market: market.to_string(),
                        side,
                        price,
                        size,
                        filled_size: Decimal::ZERO,
                        status: OrderStatus::Open,
                    },
                );
                // Resting order: move the market one tick away so the chase
                // loop has something to do.
                state.bid += dec!(1);
                state.ask += dec!(1);
            }
            Ok(OrderAck {
                id,
                market: market.to_string(),
                status: "new".into(),
            })
        }

        async fn cancel_orders(&self, _market: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.open_orders.clear();
            state.cancels += 1;
            Ok(())
        }

        async fn open_orders(&self, market: &str) -> Result<Vec<OpenOrder>> {
            Ok(MarketData::open_orders(self, market))
        }

        async fn orderbook_snapshot(&self, market: &str, _depth: u32) -> Result<BookSnapshot> {
            Ok(self.order_book(market).unwrap())
        }

        async fn balances(&self) -> Result<Vec<Balance>> {
            Ok(vec![])
        }

        async fn positions(&self) -> Result<Vec<ExchangePosition>> {
            Ok(vec![])
        }

        async fn markets(&self) -> Result<Vec<MarketInfo>> {
            Ok(vec![MarketInfo {
                name: "ETH/USD".into(),
                min_provide_size: self.min_size,
                price_increment: Decimal::ZERO,
                size_increment: Decimal::ZERO,
            }])
        }
    }

    fn engine(sim: SimExchange) -> ExecutionEngine<SimExchange, SimExchange> {
        let sim = Arc::new(sim);
        ExecutionEngine::new(sim.clone(), sim, ExecutorConfig::default())
    }

    fn request(side: Side, size: Decimal, unit: SizeUnit, aggression: Decimal) -> FillRequest {
        FillRequest {
            market: "ETH/USD".into(),
            side,
            size,
            unit,
            aggression,
            flags: OrderFlags::default(),
            client_id: None,
        }
    }

    #[tokio::test]
    async fn rejects_out_of_range_aggression() {
        for bad in [dec!(0), dec!(1), dec!(-0.2), dec!(1.5)] {
            let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
            let err = e
                .fill_limit_order(request(Side::Buy, dec!(1), SizeUnit::Base, bad))
                .await
                .unwrap_err();
            assert!(matches!(err, ChaserError::Configuration(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn rejects_quote_size_below_minimum_without_placing() {
        // mid = 101, so 0.05 quote units = ~0.000495 base < 0.001 min
        let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
        let err = e
            .fill_limit_order(request(Side::Buy, dec!(0.05), SizeUnit::Quote, dec!(0.5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChaserError::SizeTooSmall { .. }));
        assert!(e.gateway.state.lock().unwrap().placements.is_empty());
    }

    #[tokio::test]
    async fn quote_unit_converts_through_mid() {
        let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
        let report = e
            .fill_limit_order(request(Side::Buy, dec!(202), SizeUnit::Quote, dec!(0.5)))
            .await
            .unwrap();
        let placements = e.gateway.state.lock().unwrap().placements.clone();
        assert_eq!(placements.len(), 1);
        // 202 quote units at mid 101 = 2 base units
        assert_eq!(placements[0].1, dec!(2));
        assert_eq!(report.quantity_unit, SizeUnit::Quote);
        assert_eq!(report.unfilled_quantity, dec!(0));
    }

    #[tokio::test]
    async fn half_aggression_quotes_the_mid_for_both_sides() {
        for side in [Side::Buy, Side::Sell] {
            let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
            e.fill_limit_order(request(side, dec!(1), SizeUnit::Base, dec!(0.5)))
                .await
                .unwrap();
            let placements = e.gateway.state.lock().unwrap().placements.clone();
            assert_eq!(placements[0].0, dec!(101));
        }
    }

    #[tokio::test]
    async fn high_aggression_buy_quotes_near_the_ask() {
        let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
        e.fill_limit_order(request(Side::Buy, dec!(1), SizeUnit::Base, dec!(0.99)))
            .await
            .unwrap();
        let placements = e.gateway.state.lock().unwrap().placements.clone();
        // 100*0.01 + 102*0.99
        assert_eq!(placements[0].0, dec!(101.98));
    }

    #[tokio::test]
    async fn immediate_fill_produces_single_fill_at_quoted_price() {
        let e = engine(SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate));
        let report = e
            .fill_limit_order(request(Side::Buy, dec!(2), SizeUnit::Base, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(report.fills.len(), 1);
        assert_eq!(report.fill_average_price, dec!(101));
        assert_eq!(report.unfilled_quantity, dec!(0));
        assert_eq!(report.reference_price, dec!(102));
        // Filled below the ask benchmark: favorable buy
        assert!(report.slippage_ratio < Decimal::ZERO);
        assert_eq!(report.order_type, "LIMIT");
    }

    #[tokio::test]
    async fn buy_filled_above_reference_has_positive_slippage() {
        let sim = SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate)
            .with_fill_offset(dec!(3)); // fills at 104 > ask 102
        let report = engine(sim)
            .fill_limit_order(request(Side::Buy, dec!(1), SizeUnit::Base, dec!(0.5)))
            .await
            .unwrap();
        assert!(report.slippage_ratio > Decimal::ZERO);
    }

    #[tokio::test]
    async fn sell_filled_above_reference_has_negative_slippage() {
        let sim = SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate)
            .with_fill_offset(dec!(3)); // fills at 104 > bid 100
        let report = engine(sim)
            .fill_limit_order(request(Side::Sell, dec!(1), SizeUnit::Base, dec!(0.5)))
            .await
            .unwrap();
        assert!(report.slippage_ratio < Decimal::ZERO);
    }

    #[tokio::test]
    async fn requotes_when_price_moves_away_from_resting_order() {
        let sim = SimExchange::new(
            dec!(100),
            dec!(102),
            FillBehavior::RestThenFill {
                placements_before_fill: 1,
            },
        );
        let report = engine(sim)
            .fill_limit_order(request(Side::Buy, dec!(1), SizeUnit::Base, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(report.fills.len(), 1);
        // Book moved one tick after the first placement, so the second quote
        // is one tick higher than the first.
        assert_eq!(report.fill_average_price, dec!(102));
    }

    #[test]
    fn projection_sweeps_levels_and_reports_buy_slippage() {
        let snapshot = BookSnapshot {
            bids: vec![(dec!(99), dec!(10))],
            asks: vec![(dec!(100), dec!(1)), (dec!(102), dec!(3))],
            time: 1.0,
        };
        let (average, slippage, best) =
            project_slippage(&snapshot, Side::Buy, dec!(2)).unwrap();
        // 1 @ 100 + 1 @ 102
        assert_eq!(average, dec!(101));
        assert_eq!(best, dec!(100));
        assert_eq!(slippage, dec!(0.01));
    }

    #[test]
    fn projection_top_of_book_sell_has_zero_slippage() {
        let snapshot = BookSnapshot {
            bids: vec![(dec!(99), dec!(10))],
            asks: vec![(dec!(100), dec!(10))],
            time: 1.0,
        };
        let (average, slippage, _) =
            project_slippage(&snapshot, Side::Sell, dec!(5)).unwrap();
        assert_eq!(average, dec!(99));
        assert_eq!(slippage, Decimal::ZERO);
    }

    #[test]
    fn projection_clearing_the_book_is_none() {
        let snapshot = BookSnapshot {
            bids: vec![],
            asks: vec![(dec!(100), dec!(1))],
            time: 1.0,
        };
        assert!(project_slippage(&snapshot, Side::Buy, dec!(2)).is_none());
        assert!(project_slippage(&snapshot, Side::Sell, dec!(1)).is_none());
    }

    #[tokio::test]
    async fn fills_before_session_start_are_ignored() {
        let sim = SimExchange::new(dec!(100), dec!(102), FillBehavior::Immediate);
        // A stale fill for the same market, e.g. left over from an earlier
        // session, must not count toward this session's target.
        sim.state.lock().unwrap().fills.push(Fill {
            market: "ETH/USD".into(),
            side: Side::Buy,
            size: dec!(5),
            price: dec!(50),
            fee: Decimal::ZERO,
            time: Utc::now() - chrono::Duration::seconds(60),
        });
        let e = engine(sim);
        let report = e
            .fill_limit_order(request(Side::Buy, dec!(1), SizeUnit::Base, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(report.fills.len(), 1);
        assert_eq!(report.fill_average_price, dec!(101));
        // Exactly one placement: the stale fill never inflated "filled".
        assert_eq!(e.gateway.state.lock().unwrap().placements.len(), 1);
    }

    #[tokio::test]
    async fn requote_cancels_exactly_once() {
        let sim = SimExchange::new(
            dec!(100),
            dec!(102),
            FillBehavior::RestThenFill {
                placements_before_fill: 1,
            },
        );
        let e = engine(sim);
        e.fill_limit_order(request(Side::Sell, dec!(1), SizeUnit::Base, dec!(0.3)))
            .await
            .unwrap();
        let state = e.gateway.state.lock().unwrap();
        assert_eq!(state.placements.len(), 2);
        assert_eq!(state.cancels, 1);
    }
}
