// src/connectors/ftx.rs
use crate::connectors::traits::{ExchangeGateway, OrderAck};
use crate::error::{ChaserError, Result};
use crate::orderbook::BookSnapshot;
use crate::types::{Balance, ExchangePosition, MarketInfo, OpenOrder, OrderFlags, Side};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// REST order gateway. Stateless per call; safe to share across concurrent
/// execution sessions for different markets.
pub struct FtxGateway {
    api_key: String,
    api_secret: String,
    subaccount: Option<String>,
    http_client: Client,
    base_rest_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

impl FtxGateway {
    pub fn new(api_key: String, api_secret: String, subaccount: Option<String>) -> Self {
        Self {
            api_key,
            api_secret,
            subaccount,
            http_client: Client::new(),
            base_rest_url: "https://ftx.com".to_string(),
        }
    }

    fn sign(&self, ts: i64, method: &Method, path: &str, body: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|_| ChaserError::Configuration("invalid secret key length".into()))?;
        mac.update(format!("{ts}{method}{path}{body}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let ts = Utc::now().timestamp_millis();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let signature = self.sign(ts, &method, path, &body_str)?;
        let url = format!("{}{}", self.base_rest_url, path);

        let mut request = self
            .http_client
            .request(method, &url)
            .header("FTX-KEY", &self.api_key)
            .header("FTX-SIGN", signature)
            .header("FTX-TS", ts.to_string());
        if let Some(subaccount) = &self.subaccount {
            request = request.header("FTX-SUBACCOUNT", subaccount);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChaserError::Connectivity(e.to_string()))?;
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChaserError::Protocol(e.to_string()))?;
        if !parsed.success {
            return Err(ChaserError::Exchange(
                parsed.error.unwrap_or_else(|| "unknown rejection".into()),
            ));
        }
        parsed
            .result
            .ok_or_else(|| ChaserError::Protocol("success response without result".into()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_signed_request(Method::GET, path, None).await
    }
}

#[async_trait]
impl ExchangeGateway for FtxGateway {
    async fn place_order(
        &self,
        market: &str,
        side: Side,
        price: Option<Decimal>,
        size: Decimal,
        order_type: &str,
        flags: OrderFlags,
        client_id: Option<&str>,
    ) -> Result<OrderAck> {
        let body = json!({
            "market": market,
            "side": side.as_str(),
            "price": price,
            "size": size,
            "type": order_type,
            "reduceOnly": flags.reduce_only,
            "ioc": flags.ioc,
            "postOnly": flags.post_only,
            "clientId": client_id,
        });
        info!("🚀 placing {order_type} {} {size} {market} @ {price:?}", side.as_str());

        #[derive(Deserialize)]
        struct Placed {
            id: u64,
            market: String,
            status: String,
        }
        let placed: Placed = self
            .send_signed_request(Method::POST, "/api/orders", Some(body))
            .await?;
        Ok(OrderAck {
            id: placed.id,
            market: placed.market,
            status: placed.status,
        })
    }

    async fn cancel_orders(&self, market: &str) -> Result<()> {
        let _: String = self
            .send_signed_request(Method::DELETE, "/api/orders", Some(json!({"market": market})))
            .await?;
        Ok(())
    }

    async fn open_orders(&self, market: &str) -> Result<Vec<OpenOrder>> {
        let query = serde_urlencoded::to_string([("market", market)])
            .map_err(|e| ChaserError::Configuration(e.to_string()))?;
        self.get(&format!("/api/orders?{query}")).await
    }

    async fn orderbook_snapshot(&self, market: &str, depth: u32) -> Result<BookSnapshot> {
        let raw: RawBook = self
            .get(&format!("/api/markets/{market}/orderbook?depth={depth}"))
            .await?;
        Ok(BookSnapshot {
            bids: raw.bids,
            asks: raw.asks,
            time: Utc::now().timestamp_millis() as f64 / 1000.0,
        })
    }

    async fn balances(&self) -> Result<Vec<Balance>> {
        self.get("/api/wallet/balances").await
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        self.get("/api/positions").await
    }

    async fn markets(&self) -> Result<Vec<MarketInfo>> {
        self.get("/api/markets").await
    }
}
