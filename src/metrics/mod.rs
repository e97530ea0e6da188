//! Trading performance metrics.

mod summary;

pub use summary::{growth_pct, PerformanceSummary};
