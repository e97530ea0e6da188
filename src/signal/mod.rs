//! Entry and exit signals consumed by the state machine.
//!
//! Indicator logic lives behind [`SignalProvider`]; the state machine only
//! sees actions, confidence scores and exit urgency.

mod momentum;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Bar, Position, PositionSide};

pub use momentum::{MomentumConfig, MomentumSignals};

/// What the entry evaluator wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryAction {
    Long,
    Short,
    Hold,
}

impl EntryAction {
    /// Position side for an actionable signal.
    pub fn side(&self) -> Option<PositionSide> {
        match self {
            EntryAction::Long => Some(PositionSide::Long),
            EntryAction::Short => Some(PositionSide::Short),
            EntryAction::Hold => None,
        }
    }
}

/// Indicator values captured at entry time and handed back on exit checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalContext(BTreeMap<String, f64>);

impl SignalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }
}

#[derive(Debug, Clone)]
pub struct EntrySignal {
    pub action: EntryAction,
    /// 0 - 100
    pub confidence: f64,
    pub reason: String,
    pub context: SignalContext,
}

impl EntrySignal {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: EntryAction::Hold,
            confidence: 0.0,
            reason: reason.into(),
            context: SignalContext::new(),
        }
    }
}

/// Reason for exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    MaxHoldingPeriod,
    MomentumReversal,
    None,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => f.write_str("take profit"),
            ExitReason::StopLoss => f.write_str("stop loss"),
            ExitReason::MaxHoldingPeriod => f.write_str("max holding period"),
            ExitReason::MomentumReversal => f.write_str("momentum reversal"),
            ExitReason::None => f.write_str("none"),
        }
    }
}

/// How urgently to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitUrgency {
    Immediate,
    Normal,
    Low,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Hold,
    Close,
}

#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub action: ExitAction,
    pub reason: ExitReason,
    pub urgency: ExitUrgency,
}

impl ExitSignal {
    pub fn hold() -> Self {
        Self {
            action: ExitAction::Hold,
            reason: ExitReason::None,
            urgency: ExitUrgency::None,
        }
    }

    pub fn close(reason: ExitReason, urgency: ExitUrgency) -> Self {
        Self {
            action: ExitAction::Close,
            reason,
            urgency,
        }
    }

    pub fn should_exit(&self) -> bool {
        self.action == ExitAction::Close
    }
}

/// Pattern/indicator analysis feeding the state machine.
pub trait SignalProvider: Send + Sync {
    /// Evaluate a full window of bars for a new entry.
    fn evaluate_entry(&self, bars: &[Bar]) -> EntrySignal;

    /// Decide whether an open position should be closed at `price`.
    fn evaluate_exit(
        &self,
        position: &Position,
        price: f64,
        bars: &[Bar],
        context: &SignalContext,
    ) -> ExitSignal;
}
