// src/types.rs
use crate::error::ChaserError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    Spot,
    Perp,
    Future,
    Move,
}

/// A parsed exchange market symbol.
///
/// `BTC/USD` is spot, `BTC-PERP` a perpetual, `BTC-0624` a dated future and
/// `BTC-MOVE-2022-0624` a MOVE contract. Perps and futures quote in USD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub product_type: ProductType,
    pub expiry: Option<String>,
}

impl Market {
    pub fn parse(symbol: &str) -> Result<Self, ChaserError> {
        if let Some((base, quote)) = symbol.split_once('/') {
            if base.is_empty() || quote.is_empty() {
                return Err(ChaserError::Symbol(symbol.to_string()));
            }
            return Ok(Market {
                symbol: symbol.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
                product_type: ProductType::Spot,
                expiry: None,
            });
        }
        if symbol.contains('-') {
            let splits: Vec<&str> = symbol.split('-').collect();
            let base = splits[0].to_string();
            if base.is_empty() {
                return Err(ChaserError::Symbol(symbol.to_string()));
            }
            if splits.len() > 2 {
                // e.g. BTC-MOVE-0624: expiry is the trailing pair of tokens
                return Ok(Market {
                    symbol: symbol.to_string(),
                    base,
                    quote: "USD".to_string(),
                    product_type: ProductType::Move,
                    expiry: Some(splits[splits.len() - 2..].join("-")),
                });
            }
            if splits[1] == "PERP" {
                return Ok(Market {
                    symbol: symbol.to_string(),
                    base,
                    quote: "USD".to_string(),
                    product_type: ProductType::Perp,
                    expiry: None,
                });
            }
            return Ok(Market {
                symbol: symbol.to_string(),
                base,
                quote: "USD".to_string(),
                product_type: ProductType::Future,
                expiry: Some(splits[1].to_string()),
            });
        }
        Err(ChaserError::Symbol(symbol.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnit {
    Base,
    Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub last: Decimal,
    pub time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    New,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: u64,
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(rename = "filledSize", default)]
    pub filled_size: Decimal,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub market: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub time: DateTime<Utc>,
}

/// Flags passed through to the order gateway unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFlags {
    pub reduce_only: bool,
    pub ioc: bool,
    pub post_only: bool,
}

/// Per-market trading constraints, from the exchange's market listing.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    pub name: String,
    #[serde(rename = "minProvideSize")]
    pub min_provide_size: Decimal,
    #[serde(rename = "priceIncrement")]
    pub price_increment: Decimal,
    #[serde(rename = "sizeIncrement")]
    pub size_increment: Decimal,
}

/// Account balance for one coin.
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub coin: String,
    pub free: Decimal,
    pub total: Decimal,
    #[serde(rename = "usdValue")]
    pub usd_value: Decimal,
}

/// Open derivative position as reported by the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangePosition {
    pub future: String,
    pub side: Side,
    pub size: Decimal,
    /// Signed notional cost of the position in USD.
    pub cost: Decimal,
}

/// A target position row, as produced by the strategy layer.
///
/// `relative_size` is a fraction of total account value in [-1, 1]; a row is
/// unprocessed until the planner has executed its notional delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPosition {
    pub id: i64,
    pub strategy: String,
    pub group: String,
    pub base: String,
    pub quote: String,
    pub exchange: String,
    pub product_type: String,
    pub relative_size: Decimal,
    pub created_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TargetPosition {
    /// Exchange symbol this target maps to: perps trade as `{base}-PERP`,
    /// everything else as `{base}/{quote}`.
    pub fn market_symbol(&self) -> String {
        if self.product_type == "PERP" {
            format!("{}-PERP", self.base)
        } else {
            format!("{}/{}", self.base, self.quote)
        }
    }
}

/// Structured result of one execution session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub market: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reference_price: Decimal,
    pub fill_average_price: Decimal,
    pub slippage_ratio: Decimal,
    pub fills: Vec<Fill>,
    pub ordered_quantity: Decimal,
    pub quantity_unit: SizeUnit,
    pub unfilled_quantity: Decimal,
    pub order_type: String,
}
