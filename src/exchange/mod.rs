//! Exchange access for the trading core.

mod binance;
mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::models::{Bar, OrderSide, Position};
use crate::risk::SymbolFilters;

pub use binance::BinanceClient;

/// A market order to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Only allowed to shrink an existing position
    pub reduce_only: bool,
}

impl MarketOrder {
    pub fn open(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only: false,
        }
    }

    pub fn close(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only: true,
        }
    }
}

/// Exchange acknowledgment for a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
    pub executed_qty: Decimal,
    /// Average fill price, zero when the exchange has not reported one
    pub avg_price: Decimal,
}

/// Futures exchange operations used by the state machine.
///
/// Every call may suspend and may fail with a transport, rejection or
/// decode error; none of them are retried here.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Wallet balance of the quote asset (USDT).
    async fn balance(&self) -> Result<Decimal, ExchangeError>;

    /// Open position in `symbol`, if any.
    async fn position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError>;

    /// All open positions on the account.
    async fn open_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    /// Most recent `limit` bars, oldest first.
    async fn bars(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Bar>, ExchangeError>;

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError>;
}
