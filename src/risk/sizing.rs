//! Position sizing: balance-tiered risk brackets and leverage caps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TickError;

use super::{Computed, FallbackReason};

/// Combined entry + exit taker fee reserved out of every risk budget.
pub const FEE_RATE: f64 = 0.0008;

/// Sizing output for a single entry. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingDecision {
    /// Fraction of balance put at risk
    pub risk_pct: f64,
    /// Balance * risk_pct, minus the fee buffer
    pub risk_amount: f64,
    /// Kelly fraction the decision started from
    pub kelly_suggested: f64,
    /// Signal confidence mapped to 0.0 - 1.0
    pub confidence_multiplier: f64,
    /// Upper bound on leverage for this entry
    pub max_leverage: f64,
}

impl SizingDecision {
    fn conservative(balance: f64) -> Self {
        let balance = if balance.is_finite() { balance.max(0.0) } else { 0.0 };
        Self {
            risk_pct: 0.02,
            risk_amount: balance * 0.02,
            kelly_suggested: 0.02,
            confidence_multiplier: 0.6,
            max_leverage: 2.0,
        }
    }

    /// Whole-number leverage to set on the exchange, at least 1x.
    pub fn order_leverage(&self) -> u32 {
        (self.max_leverage.floor() as u32).max(1)
    }
}

/// Lot-size filter for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub min_qty: Decimal,
    pub step_size: Decimal,
}

/// (min, max) risk per trade for a balance tier.
pub fn risk_bracket(balance: f64) -> (f64, f64) {
    if balance < 20.0 {
        (0.003, 0.03)
    } else if balance < 100.0 {
        (0.005, 0.05)
    } else {
        (0.005, 0.06)
    }
}

/// Maximum leverage allowed for a balance tier.
pub fn leverage_cap(balance: f64) -> u32 {
    if balance >= 200.0 {
        5
    } else if balance >= 100.0 {
        4
    } else {
        3
    }
}

/// Size an entry from account balance, Kelly fraction and signal confidence (0-100).
pub fn size_position(balance: f64, kelly_pct: f64, confidence_score: f64) -> Computed<SizingDecision> {
    if !balance.is_finite() || !kelly_pct.is_finite() || !confidence_score.is_finite() {
        return Computed::fallback(
            SizingDecision::conservative(balance),
            FallbackReason::NumericError,
        );
    }

    let confidence_multiplier = confidence_score / 100.0;
    let adjusted_kelly = kelly_pct * confidence_multiplier;

    let (min_risk, max_risk) = risk_bracket(balance);
    let risk_pct = adjusted_kelly.clamp(min_risk, max_risk);

    // Reserve fees so that risk + fees stays within the budget
    let fee_buffer = balance * FEE_RATE;
    let risk_amount = (balance * risk_pct - fee_buffer).max(0.0);

    let cap = leverage_cap(balance) as f64;
    let max_leverage = cap.min(1.0 + confidence_multiplier * 2.0);

    let decision = SizingDecision {
        risk_pct,
        risk_amount,
        kelly_suggested: kelly_pct,
        confidence_multiplier,
        max_leverage,
    };

    if !decision.risk_amount.is_finite() || !decision.max_leverage.is_finite() {
        return Computed::fallback(
            SizingDecision::conservative(balance),
            FallbackReason::NumericError,
        );
    }

    Computed::Ok(decision)
}

/// Round a quantity to the nearest multiple of the exchange step size.
pub fn round_to_step(raw: Decimal, step_size: Decimal) -> Decimal {
    if step_size <= Decimal::ZERO {
        return raw;
    }
    ((raw / step_size).round() * step_size).normalize()
}

/// Order quantity for a risk budget, rounded to the step and checked against the minimum.
pub fn order_quantity(
    risk_amount: f64,
    leverage: u32,
    price: f64,
    filters: &SymbolFilters,
) -> Result<Decimal, TickError> {
    let raw = if price > 0.0 {
        risk_amount * leverage as f64 / price
    } else {
        0.0
    };
    let raw = Decimal::try_from(raw).unwrap_or(Decimal::ZERO);
    let quantity = round_to_step(raw, filters.step_size);

    if quantity <= Decimal::ZERO || quantity < filters.min_qty {
        return Err(TickError::InsufficientQuantity {
            quantity,
            min_qty: filters.min_qty,
        });
    }

    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_small_account_reference_sizing() {
        let decision = size_position(10.0, 0.10, 80.0);
        assert_eq!(decision.fallback_reason(), None);
        let d = decision.value();

        assert!((d.confidence_multiplier - 0.8).abs() < 1e-12);
        // adjusted kelly 0.08 clamps to the <20 tier max
        assert!((d.risk_pct - 0.03).abs() < 1e-12);
        assert!((d.risk_amount - 0.292).abs() < 1e-12);
        assert!((d.max_leverage - 2.6).abs() < 1e-12);
        assert_eq!(d.order_leverage(), 2);
    }

    #[test]
    fn test_risk_pct_stays_in_bracket() {
        for &balance in &[5.0, 19.99, 20.0, 50.0, 99.0, 100.0, 250.0, 10_000.0] {
            let (min, max) = risk_bracket(balance);
            for &kelly in &[0.0, 0.001, 0.02, 0.1] {
                for &conf in &[0.0, 60.0, 100.0] {
                    let d = size_position(balance, kelly, conf).value();
                    assert!(d.risk_pct >= min && d.risk_pct <= max);
                    assert!(d.risk_amount >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_leverage_caps_by_tier() {
        assert_eq!(leverage_cap(50.0), 3);
        assert_eq!(leverage_cap(100.0), 4);
        assert_eq!(leverage_cap(199.99), 4);
        assert_eq!(leverage_cap(200.0), 5);

        // full confidence wants 3x; only the smallest tier is not binding
        assert_eq!(size_position(500.0, 0.1, 100.0).value().max_leverage, 3.0);
        assert_eq!(size_position(50.0, 0.1, 100.0).value().max_leverage, 3.0);
        assert_eq!(size_position(50.0, 0.1, 0.0).value().max_leverage, 1.0);
    }

    #[test]
    fn test_order_leverage_within_bounds() {
        for &balance in &[5.0, 150.0, 400.0] {
            for &conf in &[0.0, 30.0, 60.0, 99.0, 100.0] {
                let d = size_position(balance, 0.1, conf).value();
                let lev = d.order_leverage();
                assert!(lev >= 1 && lev <= leverage_cap(balance));
            }
        }
    }

    #[test]
    fn test_fee_buffer_deducted() {
        // zero kelly clamps up to the tier minimum: 10 * 0.003 - 10 * 0.0008
        let d = size_position(10.0, 0.0, 60.0).value();
        assert!((d.risk_pct - 0.003).abs() < 1e-12);
        assert!((d.risk_amount - 0.022).abs() < 1e-12);

        let d = size_position(0.0, 0.1, 60.0).value();
        assert_eq!(d.risk_amount, 0.0);
    }

    #[test]
    fn test_non_finite_inputs_fall_back() {
        let decision = size_position(50.0, f64::NAN, 70.0);
        assert_eq!(decision.fallback_reason(), Some(FallbackReason::NumericError));
        let d = decision.value();
        assert_eq!(d.risk_pct, 0.02);
        assert!((d.risk_amount - 1.0).abs() < 1e-12);
        assert_eq!(d.max_leverage, 2.0);
        assert_eq!(d.confidence_multiplier, 0.6);
    }

    #[test]
    fn test_round_to_step() {
        assert_eq!(round_to_step(dec!(0.0123), dec!(0.001)), dec!(0.012));
        assert_eq!(round_to_step(dec!(0.0127), dec!(0.001)), dec!(0.013));
        assert_eq!(round_to_step(dec!(7.4), dec!(1)), dec!(7));
        assert_eq!(round_to_step(dec!(0.5), Decimal::ZERO), dec!(0.5));
    }

    #[test]
    fn test_quantity_rounded_before_minimum_check() {
        let filters = SymbolFilters {
            min_qty: dec!(0.001),
            step_size: dec!(0.001),
        };
        // raw 0.00096 rounds up to 0.001, which passes
        let qty = order_quantity(0.96, 1, 1000.0, &filters).unwrap();
        assert_eq!(qty, dec!(0.001));

        // raw 0.0004 rounds down to 0, which fails
        let err = order_quantity(0.4, 1, 1000.0, &filters).unwrap_err();
        assert!(matches!(err, TickError::InsufficientQuantity { .. }));
    }

    #[test]
    fn test_quantity_uses_leverage() {
        let filters = SymbolFilters {
            min_qty: dec!(0.001),
            step_size: dec!(0.001),
        };
        // 0.292 * 2 / 50_000 = 0.00001168 -> too small for BTC
        assert!(order_quantity(0.292, 2, 50_000.0, &filters).is_err());
        // 30 * 3 / 2_000 = 0.045
        assert_eq!(order_quantity(30.0, 3, 2_000.0, &filters).unwrap(), dec!(0.045));
    }
}
