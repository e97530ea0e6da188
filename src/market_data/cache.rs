//! Fixed-capacity per-symbol bar buffers.

use std::collections::{BTreeMap, VecDeque};

use dashmap::DashMap;

use crate::models::Bar;

/// Rolling window of recent bars per symbol.
///
/// Each symbol's buffer sits behind its own shard lock, so `append` and
/// `snapshot` are atomic per symbol while the stream task and the tick loop
/// run on different threads.
pub struct MarketDataCache {
    capacity: usize,
    bars: DashMap<String, VecDeque<Bar>>,
}

impl MarketDataCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bars: DashMap::new(),
        }
    }

    /// Add a bar update for `symbol`.
    ///
    /// An update with the same `open_time` as the newest bar replaces it
    /// (partial bars from the stream). Newer bars are appended and the
    /// oldest is evicted once the buffer is full. Updates older than the
    /// newest bar are dropped.
    pub fn append(&self, symbol: &str, bar: Bar) {
        let mut buf = self
            .bars
            .entry(symbol.to_uppercase())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        match buf.back().map(|last| last.open_time) {
            Some(t) if t == bar.open_time => {
                if let Some(last) = buf.back_mut() {
                    *last = bar;
                }
            }
            Some(t) if t > bar.open_time => {}
            _ => {
                if buf.len() == self.capacity {
                    buf.pop_front();
                }
                buf.push_back(bar);
            }
        }
    }

    /// Merge a batch of historical bars into `symbol`'s buffer.
    ///
    /// Bars are ordered by `open_time` whatever arrived first, so REST history
    /// can backfill a buffer the stream has already started. Where both hold
    /// the same bar the cached one wins. Only the newest `capacity` bars stay.
    pub fn seed(&self, symbol: &str, bars: &[Bar]) {
        let mut buf = self
            .bars
            .entry(symbol.to_uppercase())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        let mut merged: BTreeMap<i64, Bar> = bars.iter().map(|b| (b.open_time, *b)).collect();
        merged.extend(buf.iter().map(|b| (b.open_time, *b)));

        let skip = merged.len().saturating_sub(self.capacity);
        *buf = merged.into_values().skip(skip).collect();
    }

    /// The most recent `limit` bars in chronological order, or nothing.
    ///
    /// Returns an empty vector unless at least `limit` bars are stored.
    pub fn snapshot(&self, symbol: &str, limit: usize) -> Vec<Bar> {
        let Some(buf) = self.bars.get(&symbol.to_uppercase()) else {
            return Vec::new();
        };
        if limit == 0 || buf.len() < limit {
            return Vec::new();
        }
        buf.iter().skip(buf.len() - limit).copied().collect()
    }

    pub fn latest(&self, symbol: &str) -> Option<Bar> {
        self.bars
            .get(&symbol.to_uppercase())
            .and_then(|buf| buf.back().copied())
    }

    #[cfg(test)]
    pub fn len(&self, symbol: &str) -> usize {
        self.bars
            .get(&symbol.to_uppercase())
            .map(|buf| buf.len())
            .unwrap_or(0)
    }
}
