//! Trading engine: per-symbol state machine and the loop that drives it.

mod context;
mod runner;
mod state_machine;

#[cfg(test)]
mod testing;

pub use context::TradingContext;
pub use runner::{ControlCommand, RunOutcome, Runner, TradingHandle};
