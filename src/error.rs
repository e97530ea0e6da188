//! Error types for the trading core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Startup configuration problems. The only fatal error class.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Failures from exchange calls.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Network or HTTP-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange understood the request and refused it
    #[error("exchange rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// Response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("symbol not found: {0}")]
    UnknownSymbol(String),

    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Decode(err.to_string())
    }
}

/// Errors surfaced from a single tick of the state machine.
///
/// None of these stop the trading loop; the runner logs, notifies and backs off.
#[derive(Error, Debug)]
pub enum TickError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("order quantity {quantity} below exchange minimum {min_qty}")]
    InsufficientQuantity { quantity: Decimal, min_qty: Decimal },

    #[error("no market data available for {0}")]
    NoMarketData(String),

    #[error("trade log error: {0}")]
    TradeLog(#[from] anyhow::Error),
}
