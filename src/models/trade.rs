//! Trade record appended to the trade log on entries and exits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::PositionSide;

/// Whether the record was written when opening or closing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Entry,
    Exit,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Entry => "entry",
            RecordKind::Exit => "exit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(RecordKind::Entry),
            "exit" => Some(RecordKind::Exit),
            _ => None,
        }
    }
}

/// Immutable record of one trade event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,

    pub kind: RecordKind,

    pub side: PositionSide,

    /// Realized return as a fraction of entry (0 for entry records)
    pub profit_pct: f64,

    pub entry_price: Decimal,

    /// Fill or mark price at close; `None` for entry records
    pub exit_price: Option<Decimal>,

    pub quantity: Decimal,

    /// Signal confidence (0-100) that triggered the entry
    pub confidence: Option<f64>,

    /// Signal reason for entries, exit reason for exits
    pub reason: String,

    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    /// Record written after an entry order is acknowledged.
    pub fn entry(
        symbol: &str,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: RecordKind::Entry,
            side,
            profit_pct: 0.0,
            entry_price,
            exit_price: None,
            quantity,
            confidence: Some(confidence),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Record written after a close order is acknowledged.
    pub fn exit(
        symbol: &str,
        side: PositionSide,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        profit_pct: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: RecordKind::Exit,
            side,
            profit_pct,
            entry_price,
            exit_price: Some(exit_price),
            quantity,
            confidence: None,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_exit(&self) -> bool {
        self.kind == RecordKind::Exit
    }
}
