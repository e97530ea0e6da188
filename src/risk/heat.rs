//! Portfolio heat: aggregate open notional as a fraction of balance.

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::models::Position;

use super::{Computed, FallbackReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioHeat {
    /// Total open notional divided by balance
    pub total_heat_pct: f64,
    pub position_count: usize,
    pub threshold_exceeded: bool,
    pub threshold_used: f64,
}

impl PortfolioHeat {
    fn cold(position_count: usize, threshold_used: f64) -> Self {
        Self {
            total_heat_pct: 0.0,
            position_count,
            threshold_exceeded: false,
            threshold_used,
        }
    }
}

/// Maximum heat allowed for a balance tier.
pub fn heat_threshold(balance: f64) -> f64 {
    if balance < 100.0 {
        0.10
    } else if balance < 500.0 {
        0.125
    } else {
        0.15
    }
}

pub fn portfolio_heat(positions: &[Position], balance: f64) -> Computed<PortfolioHeat> {
    let threshold = heat_threshold(balance);
    if positions.is_empty() {
        return Computed::Ok(PortfolioHeat::cold(0, threshold));
    }

    let total_notional: f64 = positions
        .iter()
        .map(|p| p.notional().to_f64().unwrap_or(f64::NAN))
        .sum();

    let heat = if balance > 0.0 {
        total_notional / balance
    } else if balance.is_nan() {
        f64::NAN
    } else {
        0.0
    };

    if !heat.is_finite() {
        return Computed::fallback(
            PortfolioHeat::cold(positions.len(), threshold),
            FallbackReason::NumericError,
        );
    }

    Computed::Ok(PortfolioHeat {
        total_heat_pct: heat,
        position_count: positions.len(),
        threshold_exceeded: heat > threshold,
        threshold_used: threshold,
    })
}
