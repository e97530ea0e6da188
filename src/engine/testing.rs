//! In-process fakes for exercising the engine without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use crate::config::BotConfig;
use crate::db::MemoryTradeLog;
use crate::error::ExchangeError;
use crate::exchange::{ExchangeClient, MarketOrder, OrderAck};
use crate::market_data::MarketDataCache;
use crate::models::{Bar, OrderSide, Position, PositionSide};
use crate::notify::Notifier;
use crate::risk::SymbolFilters;
use crate::signal::{
    EntryAction, EntrySignal, ExitSignal, SignalContext, SignalProvider,
};

use super::TradingContext;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Single-account exchange that fills every market order at `fill_price`.
pub struct FakeExchange {
    balance: Mutex<Decimal>,
    position: Mutex<Option<Position>>,
    foreign: Mutex<Vec<Position>>,
    bars: Vec<Bar>,
    filters: SymbolFilters,
    fill_price: Decimal,
    order_failures: AtomicUsize,
    leverage_failures: AtomicUsize,
    filter_failures: AtomicUsize,
    bar_requests: AtomicUsize,
    orders: Mutex<Vec<MarketOrder>>,
    leverage: Mutex<Vec<u32>>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(dec!(10)),
            position: Mutex::new(None),
            foreign: Mutex::new(Vec::new()),
            bars: flat_bars(50, 100.0),
            filters: SymbolFilters {
                min_qty: dec!(0.001),
                step_size: dec!(0.001),
            },
            fill_price: dec!(100),
            order_failures: AtomicUsize::new(0),
            leverage_failures: AtomicUsize::new(0),
            filter_failures: AtomicUsize::new(0),
            bar_requests: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
            leverage: Mutex::new(Vec::new()),
        }
    }

    pub fn with_min_qty(mut self, min_qty: Decimal) -> Self {
        self.filters.min_qty = min_qty;
        self
    }

    pub fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars = bars;
        self
    }

    /// Reject the next `n` order submissions with a transport error.
    pub fn fail_next_orders(&self, n: usize) {
        self.order_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_leverage_changes(&self, n: usize) {
        self.leverage_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_filter_lookups(&self, n: usize) {
        self.filter_failures.store(n, Ordering::SeqCst);
    }

    /// Number of REST bar requests served so far.
    pub fn bar_requests(&self) -> usize {
        self.bar_requests.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: Option<Position>) {
        *lock(&self.position) = position;
    }

    pub fn set_mark_price(&self, price: Decimal) {
        if let Some(p) = lock(&self.position).as_mut() {
            p.mark_price = price;
        }
    }

    pub fn add_foreign_position(&self, position: Position) {
        lock(&self.foreign).push(position);
    }

    pub fn orders(&self) -> Vec<MarketOrder> {
        lock(&self.orders).clone()
    }

    pub fn leverage_calls(&self) -> Vec<u32> {
        lock(&self.leverage).clone()
    }
}

/// Consume one pending failure from `counter`, if any.
fn take_failure(counter: &AtomicUsize) -> Result<(), ExchangeError> {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .map_or(Ok(()), |_| Err(ExchangeError::Transport("connection reset".into())))
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(*lock(&self.balance))
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError> {
        Ok(lock(&self.position)
            .clone()
            .filter(|p| p.symbol == symbol))
    }

    async fn open_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let mut all: Vec<Position> = lock(&self.position).iter().cloned().collect();
        all.extend(lock(&self.foreign).iter().cloned());
        Ok(all)
    }

    async fn bars(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        self.bar_requests.fetch_add(1, Ordering::SeqCst);
        let skip = self.bars.len().saturating_sub(limit);
        Ok(self.bars[skip..].to_vec())
    }

    async fn symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        take_failure(&self.filter_failures)?;
        Ok(self.filters)
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        take_failure(&self.leverage_failures)?;
        lock(&self.leverage).push(leverage);
        Ok(())
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError> {
        take_failure(&self.order_failures)?;

        let order_id = {
            let mut orders = lock(&self.orders);
            orders.push(order.clone());
            orders.len() as i64
        };

        if order.reduce_only {
            self.set_position(None);
        } else {
            let side = match order.side {
                OrderSide::Buy => PositionSide::Long,
                OrderSide::Sell => PositionSide::Short,
            };
            let leverage = lock(&self.leverage).last().copied().unwrap_or(1);
            self.set_position(Some(Position::new(
                order.symbol.clone(),
                side,
                self.fill_price,
                order.quantity,
                leverage,
            )));
        }

        Ok(OrderAck {
            order_id,
            client_order_id: format!("fake-{}", order_id),
            status: "FILLED".into(),
            executed_qty: order.quantity,
            avg_price: self.fill_price,
        })
    }
}

/// Signal provider returning whatever the test last set.
pub struct FakeSignals {
    entry: Mutex<EntrySignal>,
    exit: Mutex<ExitSignal>,
}

impl FakeSignals {
    pub fn entering(action: EntryAction, confidence: f64) -> Self {
        let signals = Self {
            entry: Mutex::new(EntrySignal::hold("")),
            exit: Mutex::new(ExitSignal::hold()),
        };
        signals.set_entry(action, confidence);
        signals
    }

    pub fn set_entry(&self, action: EntryAction, confidence: f64) {
        *lock(&self.entry) = EntrySignal {
            action,
            confidence,
            reason: format!("fake {:?}", action),
            context: SignalContext::new().with("confidence", confidence),
        };
    }

    pub fn set_exit(&self, exit: ExitSignal) {
        *lock(&self.exit) = exit;
    }
}

impl SignalProvider for FakeSignals {
    fn evaluate_entry(&self, _bars: &[Bar]) -> EntrySignal {
        lock(&self.entry).clone()
    }

    fn evaluate_exit(
        &self,
        _position: &Position,
        _price: f64,
        _bars: &[Bar],
        _context: &SignalContext,
    ) -> ExitSignal {
        lock(&self.exit).clone()
    }
}

const FIVE_MINUTES_MS: i64 = 300_000;

/// `n` flat 5m bars whose newest one is still forming.
pub fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
    let now = Utc::now().timestamp_millis();
    bars_ending(n, price, now - now % FIVE_MINUTES_MS)
}

/// `n` flat 5m bars whose newest one opened a day ago.
pub fn stale_bars(n: usize, price: f64) -> Vec<Bar> {
    let now = Utc::now().timestamp_millis();
    bars_ending(n, price, now - now % FIVE_MINUTES_MS - 288 * FIVE_MINUTES_MS)
}

fn bars_ending(n: usize, price: f64, newest: i64) -> Vec<Bar> {
    (0..n)
        .map(|i| Bar::flat(newest - (n - 1 - i) as i64 * FIVE_MINUTES_MS, price))
        .collect()
}

pub struct Harness {
    pub ctx: TradingContext,
    pub exchange: Arc<FakeExchange>,
    pub signals: Arc<FakeSignals>,
    pub log: Arc<MemoryTradeLog>,
    pub notifications: mpsc::UnboundedReceiver<String>,
}

/// Context for BTCUSDT with 50 warm bars at $100 and an empty trade log.
pub fn harness(exchange: FakeExchange, signals: FakeSignals) -> Harness {
    let exchange = Arc::new(exchange);
    let signals = Arc::new(signals);
    let log = Arc::new(MemoryTradeLog::new());
    let cache = Arc::new(MarketDataCache::new(100));
    cache.seed("BTCUSDT", &flat_bars(50, 100.0));
    // zero cooldown so every notification reaches the queue
    let (notifier, notifications) = Notifier::queue(0);

    let config = BotConfig {
        api_key: "key".into(),
        api_secret: "secret".into(),
        ..BotConfig::default()
    };

    let ctx = TradingContext::new(
        config,
        exchange.clone(),
        signals.clone(),
        log.clone(),
        cache,
        notifier,
    );

    Harness {
        ctx,
        exchange,
        signals,
        log,
        notifications,
    }
}
