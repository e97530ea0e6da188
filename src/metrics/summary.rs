//! Performance summary over closed trades: win rate, returns, drawdown.

use std::fmt;

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::TradeRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// 0.0 - 1.0
    pub win_rate: f64,
    /// Sum of per-trade returns
    pub total_profit_pct: f64,
    pub avg_profit_pct: f64,
    pub best_pct: f64,
    pub worst_pct: f64,
    /// Peak-to-trough of the compounded return curve
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of per-trade returns
    pub sharpe_per_trade: f64,
}

impl PerformanceSummary {
    /// Summarize exit records; entry records are ignored.
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let returns: Vec<f64> = records
            .iter()
            .filter(|r| r.is_exit())
            .map(|r| r.profit_pct)
            .filter(|p| p.is_finite())
            .collect();

        if returns.is_empty() {
            return Self::default();
        }

        let wins = returns.iter().filter(|&&p| p > 0.0).count();
        let losses = returns.iter().filter(|&&p| p < 0.0).count();
        let total: f64 = returns.iter().sum();

        let mut summary = Self {
            closed_trades: returns.len(),
            wins,
            losses,
            win_rate: wins as f64 / returns.len() as f64,
            total_profit_pct: total,
            avg_profit_pct: total / returns.len() as f64,
            best_pct: returns.iter().copied().fold(f64::MIN, f64::max),
            worst_pct: returns.iter().copied().fold(f64::MAX, f64::min),
            max_drawdown_pct: max_drawdown(&returns),
            sharpe_per_trade: 0.0,
        };

        if returns.len() >= 2 {
            let std_dev = returns.iter().std_dev();
            if std_dev > 0.0 && std_dev.is_finite() {
                summary.sharpe_per_trade = returns.iter().mean() / std_dev;
            }
        }

        summary
    }
}

/// Largest fractional fall from a running peak of the compounded equity curve.
fn max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0f64;
    let mut peak = 1.0f64;
    let mut max_dd = 0.0f64;

    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }

    max_dd
}

/// Balance growth relative to the starting capital.
pub fn growth_pct(balance: f64, initial_balance: f64) -> f64 {
    if initial_balance <= 0.0 {
        return 0.0;
    }
    balance / initial_balance - 1.0
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.closed_trades == 0 {
            return write!(f, "No closed trades yet");
        }
        writeln!(
            f,
            "Closed trades: {} ({} wins / {} losses, win rate {:.1}%)",
            self.closed_trades,
            self.wins,
            self.losses,
            self.win_rate * 100.0
        )?;
        writeln!(
            f,
            "Total: {:+.2}%  Avg: {:+.3}%  Best: {:+.2}%  Worst: {:+.2}%",
            self.total_profit_pct * 100.0,
            self.avg_profit_pct * 100.0,
            self.best_pct * 100.0,
            self.worst_pct * 100.0
        )?;
        write!(
            f,
            "Max drawdown: {:.2}%  Sharpe/trade: {:.2}",
            self.max_drawdown_pct * 100.0,
            self.sharpe_per_trade
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn closed(p: f64) -> TradeRecord {
        TradeRecord::exit("BTCUSDT", PositionSide::Long, dec!(100), dec!(100), dec!(1), p, "t")
    }

    #[test]
    fn test_summary_counts() {
        let mut records: Vec<_> = [0.02, -0.01, 0.03, -0.005, 0.0].iter().map(|p| closed(*p)).collect();
        records.push(TradeRecord::entry("BTCUSDT", PositionSide::Long, dec!(100), dec!(1), 70.0, "e"));

        let s = PerformanceSummary::from_records(&records);
        assert_eq!(s.closed_trades, 5);
        assert_eq!(s.wins, 2);
        assert_eq!(s.losses, 2);
        assert!((s.win_rate - 0.4).abs() < 1e-12);
        assert!((s.total_profit_pct - 0.035).abs() < 1e-12);
        assert!((s.avg_profit_pct - 0.007).abs() < 1e-12);
        assert_eq!(s.best_pct, 0.03);
        assert_eq!(s.worst_pct, -0.01);
        assert!(s.sharpe_per_trade > 0.0);
    }

    #[test]
    fn test_drawdown() {
        // 1.0 -> 1.1 -> 0.88 -> 0.792 -> 0.9504
        let dd = max_drawdown(&[0.10, -0.20, -0.10, 0.20]);
        assert!((dd - 0.28).abs() < 1e-12);
        assert_eq!(max_drawdown(&[0.01, 0.02]), 0.0);
    }

    #[test]
    fn test_empty_history() {
        let s = PerformanceSummary::from_records(&[]);
        assert_eq!(s, PerformanceSummary::default());
        assert_eq!(s.to_string(), "No closed trades yet");
    }

    #[test]
    fn test_growth() {
        assert!((growth_pct(5.5, 5.0) - 0.1).abs() < 1e-12);
        assert_eq!(growth_pct(10.0, 0.0), 0.0);
    }
}
