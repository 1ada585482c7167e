// src/connectors/stream.rs
use crate::connectors::messages::{
    decode, BookAction, Channel, InboundEvent, LoginArgs, TickerData, WsRequest,
};
use crate::connectors::traits::MarketData;
use crate::error::{ChaserError, Result};
use crate::orderbook::{BookSnapshot, OrderBook};
use crate::types::{Fill, OpenOrder, OrderStatus, Ticker, Trade};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type HmacSha256 = Hmac<Sha256>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const FILL_LOG_CAPACITY: usize = 10_000;
const TRADE_LOG_CAPACITY: usize = 10_000;
const BOOK_SNAPSHOT_DEPTH: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub subaccount: Option<String>,
}

#[derive(Default)]
struct SharedState {
    books: HashMap<String, OrderBook>,
    orders: HashMap<String, HashMap<u64, OpenOrder>>,
    fills: VecDeque<Fill>,
    trades: HashMap<String, VecDeque<Trade>>,
    tickers: HashMap<String, Ticker>,
    /// Active subscriptions in original subscribe order; replayed verbatim
    /// after every reconnect.
    subscriptions: Vec<(Channel, Option<String>)>,
}

struct Inner {
    cfg: StreamConfig,
    state: RwLock<SharedState>,
    book_events: Mutex<HashMap<String, Arc<Notify>>>,
    order_events: Mutex<HashMap<String, Arc<Notify>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    stopped: AtomicBool,
}

/// Streaming market-data/account client over one duplex connection.
///
/// A single spawned task owns the socket and applies every state mutation
/// sequentially; all other tasks read through accessors returning copies, or
/// park on the wait primitives. Cheap to clone.
#[derive(Clone)]
pub struct MarketStream {
    inner: Arc<Inner>,
}

impl MarketStream {
    pub fn new(cfg: StreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: RwLock::new(SharedState::default()),
                book_events: Mutex::new(HashMap::new()),
                order_events: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Establishes the connection (one attempt, bounded) and starts the
    /// supervised run loop. Later transport failures reconnect internally
    /// with unbounded retries until `close` is called.
    pub async fn connect(&self) -> Result<()> {
        self.inner.stopped.store(false, Ordering::SeqCst);
        let ws = Inner::establish(&self.inner).await?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::supervise(inner, ws).await;
        });
        Ok(())
    }

    /// Stops the client for good; suppresses any further reconnection.
    pub fn close(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(tx) = self.inner.outbound.lock().expect("outbound lock").take() {
            let _ = tx.send(Message::Close(None));
        }
        info!("market stream stopped");
    }

    pub fn ticker(&self, market: &str) -> Option<Ticker> {
        self.inner
            .state
            .read()
            .expect("state lock")
            .tickers
            .get(market)
            .cloned()
    }

    pub fn trades(&self, market: &str) -> Vec<Trade> {
        self.inner
            .state
            .read()
            .expect("state lock")
            .trades
            .get(market)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Inner {
    async fn establish(inner: &Arc<Inner>) -> Result<WsStream> {
        let url = Url::parse(&inner.cfg.url)
            .map_err(|e| ChaserError::Configuration(format!("bad websocket url: {e}")))?;
        let connected = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| ChaserError::Connectivity("connect timed out".into()))?
            .map_err(|e| ChaserError::Connectivity(e.to_string()))?;
        info!(url = %inner.cfg.url, "websocket connected");
        Ok(connected.0)
    }

    /// Run loop supervisor: drives one session at a time, reconnecting and
    /// replaying subscriptions until explicitly stopped.
    async fn supervise(inner: Arc<Inner>, first: WsStream) {
        let mut ws = Some(first);
        loop {
            if inner.stopped.load(Ordering::SeqCst) {
                break;
            }
            let stream = match ws.take() {
                Some(s) => s,
                None => match Inner::establish(&inner).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("reconnect attempt failed: {e}");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                },
            };
            if let Err(e) = Inner::run_session(&inner, stream).await {
                if !inner.stopped.load(Ordering::SeqCst) {
                    warn!("stream session ended: {e}; reconnecting");
                }
            }
            *inner.outbound.lock().expect("outbound lock") = None;
        }
        debug!("stream supervisor exited");
    }

    async fn run_session(inner: &Arc<Inner>, stream: WsStream) -> Result<()> {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *inner.outbound.lock().expect("outbound lock") = Some(tx.clone());

        // Login plus full subscription replay, in original order, before
        // anything else goes out on this session.
        for request in inner.session_preamble() {
            let frame = serde_json::to_string(&request)
                .map_err(|e| ChaserError::Protocol(e.to_string()))?;
            write
                .send(Message::Text(frame))
                .await
                .map_err(|e| ChaserError::Connectivity(e.to_string()))?;
        }

        loop {
            tokio::select! {
                out = rx.recv() => {
                    match out {
                        Some(msg) => {
                            let closing = matches!(msg, Message::Close(_));
                            write.send(msg).await
                                .map_err(|e| ChaserError::Connectivity(e.to_string()))?;
                            if closing {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            inner.handle_raw(&text)?;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = tx.send(Message::Pong(payload));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(ChaserError::Connectivity("socket closed by peer".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(ChaserError::Connectivity(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Login (when credentials are present) followed by every active
    /// subscription, in the order they were first requested.
    fn session_preamble(&self) -> Vec<WsRequest> {
        let mut requests = Vec::new();
        if let (Some(key), Some(secret)) = (&self.cfg.api_key, &self.cfg.api_secret) {
            let ts = Utc::now().timestamp_millis();
            requests.push(WsRequest::Login {
                args: LoginArgs {
                    key: key.clone(),
                    sign: login_signature(secret, ts),
                    time: ts,
                    subaccount: self.cfg.subaccount.clone(),
                },
            });
        }
        let state = self.state.read().expect("state lock");
        for (channel, market) in &state.subscriptions {
            requests.push(WsRequest::Subscribe {
                channel: *channel,
                market: market.clone(),
            });
        }
        requests
    }

    fn send_request(&self, request: &WsRequest) -> Result<()> {
        let frame =
            serde_json::to_string(request).map_err(|e| ChaserError::Protocol(e.to_string()))?;
        if let Some(tx) = self.outbound.lock().expect("outbound lock").as_ref() {
            tx.send(Message::Text(frame))
                .map_err(|e| ChaserError::Connectivity(e.to_string()))?;
        }
        // Not connected: membership is already recorded and will be replayed
        // by the next session preamble.
        Ok(())
    }

    fn handle_raw(&self, raw: &str) -> Result<()> {
        match decode(raw)? {
            InboundEvent::Ack => Ok(()),
            InboundEvent::Reconnect => Err(ChaserError::Connectivity(
                "server requested reconnect".into(),
            )),
            InboundEvent::Error { code, msg } => {
                error!(?code, "server error frame: {msg}");
                Err(ChaserError::Protocol(msg))
            }
            InboundEvent::Orderbook { market, data } => {
                self.on_orderbook(&market, data);
                Ok(())
            }
            InboundEvent::Fill(fill) => {
                self.on_fill(fill);
                Ok(())
            }
            InboundEvent::Order(order) => {
                self.on_order(order);
                Ok(())
            }
            InboundEvent::Trades { market, trades } => {
                self.on_trades(&market, trades);
                Ok(())
            }
            InboundEvent::Ticker { market, data } => {
                self.on_ticker(&market, data);
                Ok(())
            }
        }
    }

    fn on_orderbook(&self, market: &str, data: crate::connectors::messages::BookData) {
        let verified = {
            let mut state = self.state.write().expect("state lock");
            if !state
                .subscriptions
                .contains(&(Channel::Orderbook, Some(market.to_string())))
            {
                return;
            }
            let book = state.books.entry(market.to_string()).or_default();
            if data.action == BookAction::Partial {
                book.reset();
            }
            book.apply_diffs(&data.bids, &data.asks);
            book.last_update_time = data.time;
            match book.verify_checksum(market, data.checksum) {
                Ok(()) => true,
                Err(e) => {
                    // Desync: drop the local book and force a fresh partial.
                    warn!("{e}; resubscribing");
                    state.books.remove(market);
                    false
                }
            }
        };
        if verified {
            self.notify(&self.book_events, market);
        } else {
            let _ = self.send_request(&WsRequest::Unsubscribe {
                channel: Channel::Orderbook,
                market: Some(market.to_string()),
            });
            let _ = self.send_request(&WsRequest::Subscribe {
                channel: Channel::Orderbook,
                market: Some(market.to_string()),
            });
        }
    }

    fn on_fill(&self, fill: Fill) {
        let market = fill.market.clone();
        {
            let mut state = self.state.write().expect("state lock");
            if state.fills.len() == FILL_LOG_CAPACITY {
                state.fills.pop_front();
            }
            state.fills.push_back(fill);
        }
        self.notify(&self.order_events, &market);
    }

    fn on_order(&self, order: OpenOrder) {
        let market = order.market.clone();
        {
            let mut state = self.state.write().expect("state lock");
            let table = state.orders.entry(market.clone()).or_default();
            if order.status == OrderStatus::Closed {
                debug!(id = order.id, %market, "order closed");
                table.remove(&order.id);
            } else {
                table.insert(order.id, order);
            }
        }
        self.notify(&self.order_events, &market);
    }

    fn on_trades(&self, market: &str, trades: Vec<Trade>) {
        let mut state = self.state.write().expect("state lock");
        let log = state.trades.entry(market.to_string()).or_default();
        for trade in trades {
            if log.len() == TRADE_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(trade);
        }
    }

    fn on_ticker(&self, market: &str, data: TickerData) {
        let mut state = self.state.write().expect("state lock");
        state.tickers.insert(
            market.to_string(),
            Ticker {
                market: market.to_string(),
                bid: data.bid,
                ask: data.ask,
                bid_size: data.bid_size,
                ask_size: data.ask_size,
                last: data.last,
                time: data.time,
            },
        );
    }

    fn event(&self, map: &Mutex<HashMap<String, Arc<Notify>>>, market: &str) -> Arc<Notify> {
        map.lock()
            .expect("event lock")
            .entry(market.to_string())
            .or_default()
            .clone()
    }

    fn notify(&self, map: &Mutex<HashMap<String, Arc<Notify>>>, market: &str) {
        self.event(map, market).notify_waiters();
    }
}

fn login_signature(secret: &str, ts: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{ts}websocket_login").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl MarketData for MarketStream {
    async fn subscribe(&self, channel: Channel, market: Option<&str>) -> Result<()> {
        let entry = (channel, market.map(str::to_string));
        {
            let mut state = self.inner.state.write().expect("state lock");
            if state.subscriptions.contains(&entry) {
                return Ok(());
            }
            state.subscriptions.push(entry.clone());
        }
        self.inner.send_request(&WsRequest::Subscribe {
            channel,
            market: entry.1,
        })
    }

    async fn unsubscribe(&self, channel: Channel, market: Option<&str>) -> Result<()> {
        let entry = (channel, market.map(str::to_string));
        {
            let mut state = self.inner.state.write().expect("state lock");
            let before = state.subscriptions.len();
            state.subscriptions.retain(|s| s != &entry);
            if state.subscriptions.len() == before {
                return Ok(()); // was not subscribed; nothing to do
            }
            if channel == Channel::Orderbook {
                if let Some(market) = &entry.1 {
                    state.books.remove(market);
                }
            }
        }
        self.inner.send_request(&WsRequest::Unsubscribe {
            channel,
            market: entry.1,
        })
    }

    fn order_book(&self, market: &str) -> Option<BookSnapshot> {
        let state = self.inner.state.read().expect("state lock");
        let book = state.books.get(market)?;
        if book.is_empty() {
            return None;
        }
        Some(book.snapshot(BOOK_SNAPSHOT_DEPTH))
    }

    fn open_orders(&self, market: &str) -> Vec<OpenOrder> {
        self.inner
            .state
            .read()
            .expect("state lock")
            .orders
            .get(market)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    fn fills(&self) -> Vec<Fill> {
        self.inner
            .state
            .read()
            .expect("state lock")
            .fills
            .iter()
            .cloned()
            .collect()
    }

    async fn wait_for_orderbook_update(&self, market: &str, wait: Duration) -> bool {
        let event = self.inner.event(&self.inner.book_events, market);
        timeout(wait, event.notified()).await.is_ok()
    }

    async fn wait_for_order_update(&self, market: &str, wait: Duration) -> bool {
        let event = self.inner.event(&self.inner.order_events, market);
        timeout(wait, event.notified()).await.is_ok()
    }
}
