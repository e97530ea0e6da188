//! Market data: in-memory bar cache and its streaming feed.

mod cache;
mod stream;

pub use cache::MarketDataCache;
pub use stream::{KlineStream, MAINNET_WS_URL, TESTNET_WS_URL};
