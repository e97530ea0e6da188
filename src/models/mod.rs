//! Data models for bars, positions, and trade records.

mod bar;
mod position;
mod trade;

pub use bar::{interval_millis, Bar};
pub use position::{OrderSide, Position, PositionSide};
pub use trade::{RecordKind, TradeRecord};
