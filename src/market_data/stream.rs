//! Binance futures kline WebSocket ingestion.
//!
//! Subscribes to `<symbol>@kline_<interval>` and feeds every update into the
//! shared [`MarketDataCache`]. Partial bars replace the current bar in the
//! cache until the exchange opens the next one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::MarketDataCache;
use crate::models::Bar;

pub const MAINNET_WS_URL: &str = "wss://fstream.binance.com/ws";
pub const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/ws";

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

/// Combined-stream envelope: `{"stream": "...", "data": {...}}`
#[derive(Debug, Deserialize)]
struct CombinedEnvelope {
    data: KlineEvent,
}

impl KlinePayload {
    fn to_bar(&self) -> Option<Bar> {
        Some(Bar {
            open_time: self.open_time,
            open: self.open.parse().ok()?,
            high: self.high.parse().ok()?,
            low: self.low.parse().ok()?,
            close: self.close.parse().ok()?,
            volume: self.volume.parse().ok()?,
        })
    }
}

/// Parse a kline text frame into `(symbol, bar)`.
///
/// Accepts both raw and combined-stream payloads. Anything that is not a
/// kline event yields `None`.
pub fn parse_kline_message(text: &str) -> Option<(String, Bar)> {
    let event = serde_json::from_str::<KlineEvent>(text)
        .or_else(|_| serde_json::from_str::<CombinedEnvelope>(text).map(|env| env.data))
        .ok()?;

    if event.event_type != "kline" {
        return None;
    }
    let bar = event.kline.to_bar()?;
    Some((event.symbol.to_uppercase(), bar))
}

pub fn stream_name(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

/// Long-running kline subscription for a single symbol.
pub struct KlineStream {
    url: String,
    symbol: String,
    cache: Arc<MarketDataCache>,
}

impl KlineStream {
    pub fn new(base_url: &str, symbol: &str, interval: &str, cache: Arc<MarketDataCache>) -> Self {
        Self {
            url: format!("{}/{}", base_url.trim_end_matches('/'), stream_name(symbol, interval)),
            symbol: symbol.to_uppercase(),
            cache,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run forever, reconnecting with exponential back-off.
    ///
    /// The task is expected to be aborted by its owner on shutdown.
    pub async fn run(self) {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            match self.run_once(&mut backoff).await {
                Ok(()) => info!(symbol = %self.symbol, "Kline stream closed by server"),
                Err(e) => warn!(symbol = %self.symbol, error = %e, "Kline stream error"),
            }

            let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
            info!(symbol = %self.symbol, delay_ms = delay.as_millis() as u64, "Reconnecting kline stream");
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_once(&self, backoff: &mut ExponentialBackoff) -> Result<()> {
        info!(url = %self.url, "Connecting to kline stream");
        let (mut ws, _) = connect_async(&self.url)
            .await
            .context("Failed to connect to kline stream")?;
        backoff.reset();

        while let Some(frame) = ws.next().await {
            match frame.context("Kline stream read failed")? {
                Message::Text(text) => match parse_kline_message(&text) {
                    Some((symbol, bar)) => {
                        trace!(symbol = %symbol, open_time = bar.open_time, close = bar.close, "Kline update");
                        self.cache.append(&symbol, bar);
                    }
                    None => debug!(bytes = text.len(), "Ignoring non-kline message"),
                },
                Message::Ping(payload) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .context("Failed to answer ping")?;
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }
}
