//! Position model representing our live futures position in a symbol.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    /// Derive the side from a signed exchange position amount.
    pub fn from_amount(amount: Decimal) -> Option<Self> {
        if amount > Decimal::ZERO {
            Some(PositionSide::Long)
        } else if amount < Decimal::ZERO {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" => Some(PositionSide::Long),
            "SHORT" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// A live futures position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Trading pair, e.g. "BTCUSDT"
    pub symbol: String,

    pub side: PositionSide,

    /// Average entry price
    pub entry_price: Decimal,

    /// Absolute position size in base asset units
    pub quantity: Decimal,

    pub leverage: u32,

    /// Latest mark price reported by the exchange
    #[serde(default)]
    pub mark_price: Decimal,

    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Create a new position at the given fill price.
    pub fn new(
        symbol: String,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            symbol,
            side,
            entry_price,
            quantity: quantity.abs(),
            leverage,
            mark_price: entry_price,
            opened_at: Utc::now(),
        }
    }

    /// Notional value at the current mark price.
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price
    }

    /// Return as a fraction of entry price at `price`, signed by side.
    ///
    /// Positive means the position is in profit.
    pub fn profit_pct_at(&self, price: f64) -> f64 {
        let entry = self.entry_price.to_f64().unwrap_or(0.0);
        if entry <= 0.0 {
            return 0.0;
        }
        match self.side {
            PositionSide::Long => (price - entry) / entry,
            PositionSide::Short => (entry - price) / entry,
        }
    }

    /// Return at the current mark price.
    pub fn unrealized_pct(&self) -> f64 {
        self.profit_pct_at(self.mark_price.to_f64().unwrap_or(0.0))
    }

    pub fn holding_duration(&self) -> Duration {
        Utc::now() - self.opened_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_profit_sign_follows_side() {
        let long = Position::new("BTCUSDT".into(), PositionSide::Long, dec!(100), dec!(1), 3);
        assert!((long.profit_pct_at(110.0) - 0.10).abs() < 1e-12);
        assert!((long.profit_pct_at(90.0) + 0.10).abs() < 1e-12);

        let short = Position::new("BTCUSDT".into(), PositionSide::Short, dec!(100), dec!(1), 3);
        assert!((short.profit_pct_at(90.0) - 0.10).abs() < 1e-12);
        assert!((short.profit_pct_at(110.0) + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_side_from_amount() {
        assert_eq!(PositionSide::from_amount(dec!(0.01)), Some(PositionSide::Long));
        assert_eq!(PositionSide::from_amount(dec!(-0.01)), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_amount(Decimal::ZERO), None);
    }

    #[test]
    fn test_notional_uses_absolute_quantity() {
        let mut pos = Position::new("ETHUSDT".into(), PositionSide::Short, dec!(2000), dec!(-0.5), 2);
        pos.mark_price = dec!(2100);
        assert_eq!(pos.quantity, dec!(0.5));
        assert_eq!(pos.notional(), dec!(1050));
    }
}
