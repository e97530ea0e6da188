//! Baseline moving-average momentum signals with fixed exit rules.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use super::{
    EntryAction, EntrySignal, ExitReason, ExitSignal, ExitUrgency, SignalContext, SignalProvider,
};
use crate::models::{Bar, Position, PositionSide};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Fast SMA length in bars
    pub fast_period: usize,

    /// Slow SMA length in bars
    pub slow_period: usize,

    /// Confidence points per unit of SMA spread
    pub confidence_scale: f64,

    /// Confidence never reported above this
    pub max_confidence: f64,

    /// Take profit as a fraction of entry (e.g., 0.02 = 2%)
    pub take_profit_pct: f64,

    /// Stop loss as a fraction of entry
    pub stop_loss_pct: f64,

    /// Maximum holding period in hours
    pub max_holding_hours: i64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            confidence_scale: 5_000.0, // 0.2% spread -> 60
            max_confidence: 95.0,
            take_profit_pct: 0.02,     // 2% target
            stop_loss_pct: 0.03,       // 3% emergency stop
            max_holding_hours: 12,
        }
    }
}

pub struct MomentumSignals {
    config: MomentumConfig,
}

impl MomentumSignals {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    /// (fast SMA, slow SMA) over closing prices, if enough bars are given.
    fn averages(&self, bars: &[Bar]) -> Option<(f64, f64)> {
        let slow_len = self.config.slow_period.max(self.config.fast_period);
        if self.config.fast_period == 0 || bars.len() < slow_len {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast = closes[closes.len() - self.config.fast_period..].iter().mean();
        let slow = closes[closes.len() - slow_len..].iter().mean();
        if fast.is_finite() && slow.is_finite() && slow > 0.0 {
            Some((fast, slow))
        } else {
            None
        }
    }
}

impl SignalProvider for MomentumSignals {
    fn evaluate_entry(&self, bars: &[Bar]) -> EntrySignal {
        let Some((fast, slow)) = self.averages(bars) else {
            return EntrySignal::hold("Not enough bars");
        };
        let last = bars[bars.len() - 1];
        let first_fast = bars[bars.len() - self.config.fast_period];
        let momentum = if first_fast.open > 0.0 {
            (last.close - first_fast.open) / first_fast.open
        } else {
            0.0
        };
        let spread = (fast - slow) / slow;

        let action = if spread > 0.0 && momentum > 0.0 {
            EntryAction::Long
        } else if spread < 0.0 && momentum < 0.0 {
            EntryAction::Short
        } else {
            EntryAction::Hold
        };

        let confidence = match action {
            EntryAction::Hold => 0.0,
            _ => (50.0 + spread.abs() * self.config.confidence_scale)
                .clamp(0.0, self.config.max_confidence),
        };

        debug!(
            fast = fast,
            slow = slow,
            spread = spread,
            momentum = momentum,
            confidence = confidence,
            "Momentum entry evaluated"
        );

        EntrySignal {
            action,
            confidence,
            reason: format!(
                "SMA{} {} SMA{} by {:.3}%, momentum {:+.3}%",
                self.config.fast_period,
                if spread >= 0.0 { "above" } else { "below" },
                self.config.slow_period,
                spread.abs() * 100.0,
                momentum * 100.0
            ),
            context: SignalContext::new()
                .with("fast_sma", fast)
                .with("slow_sma", slow)
                .with("spread", spread)
                .with("entry_close", last.close),
        }
    }

    fn evaluate_exit(
        &self,
        position: &Position,
        price: f64,
        bars: &[Bar],
        context: &SignalContext,
    ) -> ExitSignal {
        let return_pct = position.profit_pct_at(price);

        if return_pct >= self.config.take_profit_pct {
            info!(symbol = %position.symbol, return_pct = return_pct, "Take profit triggered");
            return ExitSignal::close(ExitReason::TakeProfit, ExitUrgency::Normal);
        }

        if return_pct <= -self.config.stop_loss_pct {
            warn!(symbol = %position.symbol, return_pct = return_pct, "Stop loss triggered");
            return ExitSignal::close(ExitReason::StopLoss, ExitUrgency::Immediate);
        }

        let holding_hours = position.holding_duration().num_hours();
        if holding_hours >= self.config.max_holding_hours {
            info!(symbol = %position.symbol, hours = holding_hours, "Max holding period reached");
            return ExitSignal::close(ExitReason::MaxHoldingPeriod, ExitUrgency::Normal);
        }

        // Reversal only counts once the trend has flipped against the entry
        if let Some((fast, slow)) = self.averages(bars) {
            let spread = (fast - slow) / slow;
            let reversed = match position.side {
                PositionSide::Long => spread < 0.0,
                PositionSide::Short => spread > 0.0,
            };
            let entered_with_trend = context.get("spread").map_or(true, |s| match position.side {
                PositionSide::Long => s > 0.0,
                PositionSide::Short => s < 0.0,
            });
            if reversed && entered_with_trend {
                info!(symbol = %position.symbol, spread = spread, "Momentum reversed");
                return ExitSignal::close(ExitReason::MomentumReversal, ExitUrgency::Low);
            }
        }

        ExitSignal::hold()
    }
}
