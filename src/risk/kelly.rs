//! Kelly criterion and the risk profile derived from trade history.

use statrs::statistics::Statistics;

use crate::models::TradeRecord;

use super::{Computed, FallbackReason};

/// Win rate assumed until enough trades have been recorded.
pub const DEFAULT_WIN_RATE: f64 = 0.6;
/// Average winning return assumed until enough trades have been recorded.
pub const DEFAULT_AVG_WIN: f64 = 0.015;
/// Average losing return (absolute) assumed until enough trades have been recorded.
pub const DEFAULT_AVG_LOSS: f64 = 0.01;
/// Minimum trades before the profile is derived from history.
pub const MIN_PROFILE_SAMPLES: usize = 5;

/// Hard cap on the raw Kelly fraction.
const KELLY_CAP: f64 = 0.25;
/// Above this, only a fraction of Kelly is used.
const FRACTIONAL_THRESHOLD: f64 = 0.05;
const FRACTIONAL_SCALE: f64 = 0.4;

const DEGENERATE_FALLBACK: f64 = 0.01;
const NUMERIC_FALLBACK: f64 = 0.02;

/// Kelly criterion, capped and scaled down for small accounts.
///
/// f* = (b * p - q) / b
/// where:
///   p = win rate
///   q = 1 - p
///   b = avg_win / |avg_loss|
///
/// The raw fraction is clamped to [0, 0.25]. Clamped values above 0.05 are
/// multiplied by 0.4; values at or below 0.05 are returned as is.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> Computed<f64> {
    if avg_loss <= 0.0 || win_rate <= 0.0 || win_rate >= 1.0 {
        return Computed::fallback(DEGENERATE_FALLBACK, FallbackReason::DegenerateInputs);
    }

    let b = avg_win / avg_loss.abs();
    if b == 0.0 || !b.is_finite() {
        return Computed::fallback(NUMERIC_FALLBACK, FallbackReason::NumericError);
    }

    let p = win_rate;
    let q = 1.0 - p;
    let raw = (b * p - q) / b;
    if !raw.is_finite() {
        return Computed::fallback(NUMERIC_FALLBACK, FallbackReason::NumericError);
    }

    let clamped = raw.clamp(0.0, KELLY_CAP);
    if clamped > FRACTIONAL_THRESHOLD {
        Computed::Ok(clamped * FRACTIONAL_SCALE)
    } else {
        Computed::Ok(clamped)
    }
}

/// Performance-derived inputs for sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskProfile {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub kelly_pct: f64,
    pub sample_size: usize,
    /// Set when `kelly_pct` is a fallback constant rather than computed
    pub kelly_fallback: Option<FallbackReason>,
}

impl RiskProfile {
    /// Conservative defaults used while history is too short.
    pub fn defaults(sample_size: usize) -> Self {
        let kelly = kelly_fraction(DEFAULT_WIN_RATE, DEFAULT_AVG_WIN, DEFAULT_AVG_LOSS);
        Self {
            win_rate: DEFAULT_WIN_RATE,
            avg_win: DEFAULT_AVG_WIN,
            avg_loss: DEFAULT_AVG_LOSS,
            kelly_fallback: kelly.fallback_reason(),
            kelly_pct: kelly.value(),
            sample_size,
        }
    }

    pub fn is_default(&self) -> bool {
        self.sample_size < MIN_PROFILE_SAMPLES
    }
}

/// Derive a risk profile from trade records.
///
/// Records with zero profit count towards the sample but are neither wins nor
/// losses, so they lower the win rate.
pub fn update_risk_profile(trades: &[TradeRecord]) -> RiskProfile {
    if trades.len() < MIN_PROFILE_SAMPLES {
        return RiskProfile::defaults(trades.len());
    }

    let wins: Vec<f64> = trades
        .iter()
        .map(|t| t.profit_pct)
        .filter(|p| *p > 0.0)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .map(|t| t.profit_pct)
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .collect();

    let win_rate = wins.len() as f64 / trades.len() as f64;
    let avg_win = if wins.is_empty() {
        DEFAULT_AVG_WIN
    } else {
        wins.iter().mean()
    };
    let avg_loss = if losses.is_empty() {
        DEFAULT_AVG_LOSS
    } else {
        losses.iter().mean()
    };

    let kelly = kelly_fraction(win_rate, avg_win, avg_loss);

    RiskProfile {
        win_rate,
        avg_win,
        avg_loss,
        kelly_fallback: kelly.fallback_reason(),
        kelly_pct: kelly.value(),
        sample_size: trades.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn closed(profit_pct: f64) -> TradeRecord {
        TradeRecord::exit(
            "BTCUSDT",
            PositionSide::Long,
            dec!(100),
            dec!(100),
            dec!(0.01),
            profit_pct,
            "test",
        )
    }

    #[test]
    fn test_kelly_reference_value() {
        // b = 1.5, raw = (1.5 * 0.6 - 0.4) / 1.5 = 0.333 -> 0.25 -> * 0.4
        let k = kelly_fraction(0.6, 0.015, 0.01);
        assert_eq!(k.fallback_reason(), None);
        assert!((k.value() - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_kelly_bounds_and_fractional_scaling() {
        for &p in &[0.05, 0.2, 0.35, 0.5, 0.55, 0.6, 0.75, 0.9, 0.99] {
            for &(w, l) in &[(0.01, 0.01), (0.02, 0.01), (0.005, 0.02), (0.03, 0.015), (0.1, 0.01)] {
                let k = kelly_fraction(p, w, l).value();
                assert!((0.0..=KELLY_CAP).contains(&k), "p={p} w={w} l={l} k={k}");

                let b = w / l;
                let clamped = ((b * p - (1.0 - p)) / b).clamp(0.0, KELLY_CAP);
                if clamped > FRACTIONAL_THRESHOLD {
                    assert_eq!(k, clamped * FRACTIONAL_SCALE);
                } else {
                    assert_eq!(k, clamped);
                }
            }
        }
    }

    #[test]
    fn test_kelly_discontinuity_at_threshold() {
        // p = 0.5, b = 1.25 -> raw = (0.625 - 0.5) / 1.25 = 0.1 -> scaled to 0.04
        let above = kelly_fraction(0.5, 0.0125, 0.01).value();
        assert!((above - 0.04).abs() < 1e-12);

        // p = 0.5, b = 1.1 -> raw = 0.0454.. stays unscaled
        let below = kelly_fraction(0.5, 0.011, 0.01).value();
        assert!((below - 0.05 / 1.1).abs() < 1e-12);
        assert!(below > above);
    }

    #[test]
    fn test_kelly_degenerate_inputs() {
        for (p, w, l) in [(0.0, 0.02, 0.01), (1.0, 0.02, 0.01), (0.6, 0.02, 0.0), (0.6, 0.02, -0.01)] {
            let k = kelly_fraction(p, w, l);
            assert_eq!(k.fallback_reason(), Some(FallbackReason::DegenerateInputs));
            assert_eq!(k.value(), 0.01);
        }
    }

    #[test]
    fn test_kelly_numeric_error() {
        let k = kelly_fraction(0.6, 0.0, 0.01);
        assert_eq!(k.fallback_reason(), Some(FallbackReason::NumericError));
        assert_eq!(k.value(), 0.02);

        let k = kelly_fraction(f64::NAN, 0.02, 0.01);
        assert_eq!(k.value(), 0.02);
    }

    #[test]
    fn test_negative_edge_clamps_to_zero() {
        let k = kelly_fraction(0.3, 0.01, 0.01);
        assert_eq!(k.fallback_reason(), None);
        assert_eq!(k.value(), 0.0);
    }

    #[test]
    fn test_empty_history_uses_defaults() {
        let profile = update_risk_profile(&[]);
        assert_eq!(profile.win_rate, 0.6);
        assert_eq!(profile.avg_win, 0.015);
        assert_eq!(profile.avg_loss, 0.01);
        assert_eq!(profile.sample_size, 0);
        assert!((profile.kelly_pct - 0.10).abs() < 1e-12);
        assert!(profile.is_default());
    }

    #[test]
    fn test_short_history_uses_defaults() {
        let trades: Vec<_> = [0.05, 0.04, -0.3, 0.01].iter().map(|p| closed(*p)).collect();
        assert_eq!(update_risk_profile(&trades), RiskProfile::defaults(4));
    }

    #[test]
    fn test_profile_from_history() {
        let trades: Vec<_> = [0.02, -0.01, 0.04, -0.03, 0.0, 0.03]
            .iter()
            .map(|p| closed(*p))
            .collect();
        let profile = update_risk_profile(&trades);

        assert_eq!(profile.sample_size, 6);
        assert!((profile.win_rate - 0.5).abs() < 1e-12);
        assert!((profile.avg_win - 0.03).abs() < 1e-12);
        assert!((profile.avg_loss - 0.02).abs() < 1e-12);
        // b = 1.5, raw = (0.75 - 0.5) / 1.5 = 0.1667 -> * 0.4
        assert!((profile.kelly_pct - 0.0666666666).abs() < 1e-9);
        assert!(profile.kelly_fallback.is_none());
    }

    #[test]
    fn test_all_wins_uses_default_loss() {
        let trades: Vec<_> = (0..5).map(|_| closed(0.02)).collect();
        let profile = update_risk_profile(&trades);
        assert_eq!(profile.win_rate, 1.0);
        assert_eq!(profile.avg_loss, DEFAULT_AVG_LOSS);
        // win rate of 1.0 is degenerate for Kelly
        assert_eq!(profile.kelly_fallback, Some(FallbackReason::DegenerateInputs));
        assert_eq!(profile.kelly_pct, 0.01);
    }
}
