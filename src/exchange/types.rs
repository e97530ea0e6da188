//! Binance USDⓈ-M futures REST response types.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ExchangeError;
use crate::models::{Bar, Position, PositionSide};
use crate::risk::SymbolFilters;

/// Error body returned with 4xx/5xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// Entry from `GET /fapi/v2/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub asset: String,
    pub balance: Decimal,
}

/// Entry from `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRiskResponse {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    #[serde(default)]
    pub leverage: Option<String>,
    #[serde(default)]
    pub update_time: i64,
}

impl PositionRiskResponse {
    /// Convert to a [`Position`], or `None` when the amount is zero.
    pub fn into_position(self) -> Option<Position> {
        let side = PositionSide::from_amount(self.position_amt)?;
        let leverage = self
            .leverage
            .as_deref()
            .and_then(|l| l.parse::<u32>().ok())
            .unwrap_or(1);

        let mut position = Position::new(
            self.symbol,
            side,
            self.entry_price,
            self.position_amt,
            leverage,
        );
        position.mark_price = self.mark_price;
        if self.update_time > 0 {
            if let Some(ts) = Utc.timestamp_millis_opt(self.update_time).single() {
                position.opened_at = ts;
            }
        }
        Some(position)
    }
}

/// `GET /fapi/v1/exchangeInfo`, reduced to what we read.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default)]
    pub min_qty: Option<Decimal>,
    #[serde(default)]
    pub step_size: Option<Decimal>,
}

impl ExchangeInfoResponse {
    /// Lot-size filter for `symbol`.
    pub fn lot_size(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info = self
            .symbols
            .iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let lot = info
            .filters
            .iter()
            .find(|f| f.filter_type == "LOT_SIZE")
            .ok_or_else(|| ExchangeError::Decode(format!("no LOT_SIZE filter for {}", symbol)))?;

        match (lot.min_qty, lot.step_size) {
            (Some(min_qty), Some(step_size)) => Ok(SymbolFilters { min_qty, step_size }),
            _ => Err(ExchangeError::Decode(format!(
                "incomplete LOT_SIZE filter for {}",
                symbol
            ))),
        }
    }
}

/// Response from `POST /fapi/v1/leverage`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeverageResponse {
    pub leverage: u32,
    pub symbol: String,
}

/// Response from `POST /fapi/v1/order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub client_order_id: String,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
}

/// Parse `GET /fapi/v1/klines` rows:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_klines(rows: &[Vec<serde_json::Value>]) -> Result<Vec<Bar>, ExchangeError> {
    rows.iter().map(|row| parse_kline_row(row)).collect()
}

fn parse_kline_row(row: &[serde_json::Value]) -> Result<Bar, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Decode(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Decode("kline open time".to_string()))?;

    let field = |i: usize| -> Result<f64, ExchangeError> {
        let value = match &row[i] {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        };
        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {}", i)))
    };

    Ok(Bar {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_klines() {
        let body = r#"[
            [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815",
             1499644799999, "2434.19055334", 308, "1756.87402397", "28.46694368", "0"],
            [1499040300000, "0.01577100", "0.01600000", "0.01570000", "0.01590000", "100.0",
             1499040599999, "0", 1, "0", "0", "0"]
        ]"#;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body).unwrap();
        let bars = parse_klines(&rows).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open_time, 1_499_040_000_000);
        assert_eq!(bars[0].high, 0.8);
        assert_eq!(bars[1].close, 0.0159);
        assert_eq!(bars[1].volume, 100.0);
    }

    #[test]
    fn test_short_kline_row_is_decode_error() {
        let rows = vec![vec![serde_json::json!(1), serde_json::json!("1.0")]];
        assert!(matches!(parse_klines(&rows), Err(ExchangeError::Decode(_))));
    }

    #[test]
    fn test_lot_size_filter() {
        let body = r#"{
            "timezone": "UTC",
            "symbols": [{
                "symbol": "BTCUSDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "556.80", "tickSize": "0.10"},
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"},
                    {"filterType": "MARKET_LOT_SIZE", "minQty": "0.001", "maxQty": "120", "stepSize": "0.001"}
                ]
            }]
        }"#;
        let info: ExchangeInfoResponse = serde_json::from_str(body).unwrap();
        let filters = info.lot_size("btcusdt").unwrap();
        assert_eq!(filters.min_qty, dec!(0.001));
        assert_eq!(filters.step_size, dec!(0.001));

        assert!(matches!(
            info.lot_size("ETHUSDT"),
            Err(ExchangeError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_position_risk_conversion() {
        let body = r#"[
            {"symbol": "BTCUSDT", "positionAmt": "-0.010", "entryPrice": "40000.0", "markPrice": "39000.0",
             "unRealizedProfit": "10.0", "leverage": "3", "positionSide": "BOTH", "updateTime": 1700000000000},
            {"symbol": "ETHUSDT", "positionAmt": "0.000", "entryPrice": "0.0", "markPrice": "2000.0",
             "leverage": "20", "positionSide": "BOTH", "updateTime": 0}
        ]"#;
        let rows: Vec<PositionRiskResponse> = serde_json::from_str(body).unwrap();
        let positions: Vec<Position> = rows.into_iter().filter_map(|r| r.into_position()).collect();

        assert_eq!(positions.len(), 1);
        let pos = &positions[0];
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.quantity, dec!(0.010));
        assert_eq!(pos.leverage, 3);
        assert_eq!(pos.mark_price, dec!(39000));
        assert_eq!(pos.opened_at.timestamp_millis(), 1_700_000_000_000);
        assert!((pos.unrealized_pct() - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_order_response() {
        let body = r#"{"orderId": 22542179, "symbol": "BTCUSDT", "status": "FILLED",
            "clientOrderId": "kb-abc", "avgPrice": "40010.5", "executedQty": "0.002",
            "side": "BUY", "type": "MARKET", "reduceOnly": false}"#;
        let ack: OrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(ack.order_id, 22542179);
        assert_eq!(ack.avg_price, dec!(40010.5));
        assert_eq!(ack.executed_qty, dec!(0.002));
    }
}
