//! OHLCV price bar.

use serde::{Deserialize, Serialize};

/// One OHLCV sample for a fixed interval.
///
/// `open_time` is the bar's opening timestamp in milliseconds, which is also
/// the identity used by the cache to merge partial updates of the same bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a bar with all prices set to `price`.
    #[cfg(test)]
    pub fn flat(open_time: i64, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// True once the bar opened more than two intervals before `now_ms`.
    ///
    /// The newest bar of a live feed is the one still forming, so it is never
    /// more than one interval old.
    pub fn is_stale_at(&self, interval_ms: i64, now_ms: i64) -> bool {
        now_ms - self.open_time > 2 * interval_ms
    }
}

/// Length of a Binance kline interval (`1m`, `4h`, `1d`, `1w`, `1M`) in milliseconds.
pub fn interval_millis(interval: &str) -> Option<i64> {
    let unit = interval.chars().last()?;
    let count: i64 = interval[..interval.len() - unit.len_utf8()].parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_ms = match unit {
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 7 * 86_400_000,
        // months vary; 31 days keeps the staleness bound loose
        'M' => 31 * 86_400_000,
        _ => return None,
    };
    Some(count * unit_ms)
}
