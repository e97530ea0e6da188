//! Risk engine: Kelly fraction, risk profile, position sizing, portfolio heat.
//!
//! Every calculation here is total. Degenerate inputs never produce an error;
//! they produce a documented conservative constant tagged with the reason,
//! so callers can use the value directly while tests can still tell the
//! computed path from the fallback path.

mod heat;
mod kelly;
mod sizing;

pub use heat::portfolio_heat;
pub use kelly::update_risk_profile;
pub use sizing::{leverage_cap, order_quantity, size_position, SymbolFilters};

/// Why a calculation fell back to a conservative constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Win rate outside (0, 1) or non-positive average loss
    DegenerateInputs,
    /// Division by zero or a non-finite intermediate value
    NumericError,
}

/// Result of a risk calculation: either computed or a named fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Computed<T> {
    Ok(T),
    Fallback { value: T, reason: FallbackReason },
}

impl<T> Computed<T> {
    pub fn fallback(value: T, reason: FallbackReason) -> Self {
        Computed::Fallback { value, reason }
    }

    /// The usable value, whichever path produced it.
    pub fn value(self) -> T {
        match self {
            Computed::Ok(v) => v,
            Computed::Fallback { value, .. } => value,
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Computed::Ok(_) => None,
            Computed::Fallback { reason, .. } => Some(*reason),
        }
    }
}
