//! Binance USDⓈ-M futures REST client.
//!
//! Private endpoints are signed with HMAC-SHA256 over the query string and
//! authenticated with the `X-MBX-APIKEY` header. All parameters, including
//! those of POST requests, are sent in the query string.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::*;
use super::{ExchangeClient, MarketOrder, OrderAck};
use crate::error::ExchangeError;
use crate::models::{Bar, Position};
use crate::risk::SymbolFilters;

pub const MAINNET_REST_URL: &str = "https://fapi.binance.com";
pub const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u64 = 5_000;
const QUOTE_ASSET: &str = "USDT";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `query` keyed with the API secret.
pub fn sign_query(secret: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Map a response body to `T`, or to the exchange's error payload.
fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ExchangeError> {
    if status.is_success() {
        return serde_json::from_str(body).map_err(ExchangeError::from);
    }

    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(err) => Err(ExchangeError::Rejected {
            code: err.code,
            message: err.msg,
        }),
        Err(_) => Err(ExchangeError::Transport(format!("HTTP {}: {}", status, body))),
    }
}

/// Signed REST client for one account on mainnet or testnet.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String, testnet: bool) -> Result<Self, ExchangeError> {
        let base_url = if testnet {
            TESTNET_REST_URL
        } else {
            MAINNET_REST_URL
        };
        Self::with_base_url(api_key, api_secret, base_url.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        api_key: String,
        api_secret: String,
        base_url: String,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signed_query(&self, params: &[(&str, String)], timestamp: i64) -> Result<String, ExchangeError> {
        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("recvWindow={}&timestamp={}", RECV_WINDOW_MS, timestamp));
        let signature = sign_query(&self.api_secret, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, encode_params(params));
        debug!(url = %url, "Binance public request");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_body(status, &body)
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = self.signed_query(params, Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(method = %method, path = %path, "Binance signed request");

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let result = decode_body(status, &body);
        if let Err(ExchangeError::Rejected { code, message }) = &result {
            warn!(path = %path, code = code, message = %message, "Binance rejected request");
        }
        result
    }

    async fn position_risk(&self, symbol: Option<&str>) -> Result<Vec<Position>, ExchangeError> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_uppercase())])
            .unwrap_or_default();
        let rows: Vec<PositionRiskResponse> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &params)
            .await?;
        Ok(rows.into_iter().filter_map(|r| r.into_position()).collect())
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn balance(&self) -> Result<Decimal, ExchangeError> {
        let balances: Vec<BalanceResponse> =
            self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;

        Ok(balances
            .into_iter()
            .find(|b| b.asset == QUOTE_ASSET)
            .map(|b| b.balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError> {
        let positions = self.position_risk(Some(symbol)).await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol)))
    }

    async fn open_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        self.position_risk(None).await
    }

    async fn bars(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_uppercase()),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, 1500).to_string()),
        ];
        let rows: Vec<Vec<serde_json::Value>> = self.public_get("/fapi/v1/klines", &params).await?;
        parse_klines(&rows)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info: ExchangeInfoResponse = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        info.lot_size(symbol)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_uppercase()),
            ("leverage", leverage.to_string()),
        ];
        let resp: LeverageResponse = self
            .signed(Method::POST, "/fapi/v1/leverage", &params)
            .await?;
        info!(symbol = %resp.symbol, leverage = resp.leverage, "Leverage set");
        Ok(())
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError> {
        let client_order_id = format!("kb{}", Uuid::new_v4().simple());
        let mut params = vec![
            ("symbol", order.symbol.to_uppercase()),
            ("side", order.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("newClientOrderId", client_order_id),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let resp: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", &params).await?;

        info!(
            symbol = %resp.symbol,
            order_id = resp.order_id,
            status = %resp.status,
            executed_qty = %resp.executed_qty,
            avg_price = %resp.avg_price,
            "Market order acknowledged"
        );

        Ok(OrderAck {
            order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            status: resp.status,
            executed_qty: resp.executed_qty,
            avg_price: resp.avg_price,
        })
    }
}
