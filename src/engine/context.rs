//! Everything a state machine needs, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::BotConfig;
use crate::db::TradeLog;
use crate::exchange::ExchangeClient;
use crate::market_data::MarketDataCache;
use crate::models::Position;
use crate::notify::Notifier;
use crate::signal::SignalProvider;

/// Open positions keyed by symbol.
///
/// Written only by the state machine; everyone else reads snapshots.
pub type PositionBook = Arc<RwLock<HashMap<String, Position>>>;

#[derive(Clone)]
pub struct TradingContext {
    pub config: BotConfig,
    pub exchange: Arc<dyn ExchangeClient>,
    pub signals: Arc<dyn SignalProvider>,
    pub trade_log: Arc<dyn TradeLog>,
    pub cache: Arc<MarketDataCache>,
    pub notifier: Notifier,
    pub positions: PositionBook,
}

impl TradingContext {
    pub fn new(
        config: BotConfig,
        exchange: Arc<dyn ExchangeClient>,
        signals: Arc<dyn SignalProvider>,
        trade_log: Arc<dyn TradeLog>,
        cache: Arc<MarketDataCache>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            exchange,
            signals,
            trade_log,
            cache,
            notifier,
            positions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }
}
