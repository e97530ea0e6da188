//! Kelly Futures Bot
//!
//! Trades one Binance USDⓈ-M futures symbol, sizing every entry with a
//! capped Kelly fraction derived from its own closed-trade history.

mod config;
mod db;
mod engine;
mod error;
mod exchange;
mod market_data;
mod metrics;
mod models;
mod notify;
mod risk;
mod signal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::BotConfig;
use crate::db::{Database, TradeLog};
use crate::engine::{ControlCommand, RunOutcome, Runner, TradingContext, TradingHandle};
use crate::exchange::{BinanceClient, ExchangeClient};
use crate::market_data::{KlineStream, MarketDataCache, MAINNET_WS_URL, TESTNET_WS_URL};
use crate::metrics::{growth_pct, PerformanceSummary};
use crate::notify::{
    BotCommand, LogChannel, NotificationChannel, Notifier, TelegramChannel,
    TelegramCommandListener,
};
use crate::risk::{size_position, update_risk_profile};
use crate::signal::MomentumSignals;

/// Trade records kept when the log is trimmed on startup.
const HISTORY_KEEP: usize = 100;

/// How long shutdown waits for queued notifications to go out.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Capped-Kelly futures trading bot CLI.
#[derive(Parser)]
#[command(name = "kellybot")]
#[command(about = "Trade Binance futures with capped-Kelly position sizing", long_about = None)]
struct Cli {
    /// JSON config file (missing file means defaults)
    #[arg(short, long, default_value = "kellybot.json")]
    config: PathBuf,

    /// Database URL, overrides the config file
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start trading
    Run,

    /// Show the effective configuration
    Config,

    /// Show the sizing decision for a balance and signal confidence
    Size {
        /// Account balance in USDT
        #[arg(short, long)]
        balance: f64,

        /// Signal confidence (0-100)
        #[arg(short, long)]
        confidence: f64,

        /// Kelly fraction; derived from trade history when omitted
        #[arg(short, long)]
        kelly: Option<f64>,
    },

    /// Show recent trade records and performance
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show bot status and statistics
    Status,

    /// Delete all but the newest trade records
    Trim {
        #[arg(short, long, default_value = "100")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match cli.command {
        Commands::Run => BotConfig::load(Some(cli.config.as_path()))?,
        _ => BotConfig::resolve(Some(cli.config.as_path()))?,
    };
    if let Some(url) = cli.database {
        config.database_url = url;
    }

    let db = Arc::new(Database::new(&config.database_url).await?);

    match cli.command {
        Commands::Run => run(config, db).await?,

        Commands::Config => {
            let shown = config.redacted();
            println!("\n=== Bot Configuration ===\n");
            println!("{}", serde_json::to_string_pretty(&shown)?);
            if let Err(e) = config.validate() {
                println!("\nWarning: {}", e);
            }
        }

        Commands::Size {
            balance,
            confidence,
            kelly,
        } => {
            let kelly = match kelly {
                Some(k) => k,
                None => {
                    let history = db.recent_exits(config.risk_lookback).await?;
                    let profile = update_risk_profile(&history);
                    println!("\n=== Risk Profile ({} closed trades) ===", profile.sample_size);
                    if profile.is_default() {
                        println!("(too few trades, using defaults)");
                    }
                    println!("Win Rate:       {:.1}%", profile.win_rate * 100.0);
                    println!("Avg Win:        {:.3}%", profile.avg_win * 100.0);
                    println!("Avg Loss:       {:.3}%", profile.avg_loss * 100.0);
                    println!("Kelly:          {:.4}", profile.kelly_pct);
                    profile.kelly_pct
                }
            };

            let sizing = size_position(balance, kelly, confidence);
            let fallback = sizing.fallback_reason();
            let d = sizing.value();

            println!("\n=== Sizing Decision ===");
            println!("Balance:        ${:.2}", balance);
            println!("Risk:           {:.2}% (${:.4})", d.risk_pct * 100.0, d.risk_amount);
            println!("Kelly Input:    {:.4}", d.kelly_suggested);
            println!("Confidence:     x{:.2}", d.confidence_multiplier);
            println!("Max Leverage:   {:.2} (order {}x)", d.max_leverage, d.order_leverage());
            if let Some(reason) = fallback {
                println!("Fallback:       {:?}", reason);
            }
        }

        Commands::History { limit } => {
            let records = db.recent(limit).await?;
            if records.is_empty() {
                println!("No trade records yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<9} {:<6} {:<5} {:>12} {:>12} {:>10} {:>8}  {}",
                "TIME", "SYMBOL", "KIND", "SIDE", "ENTRY", "EXIT", "QTY", "P&L%", "REASON"
            );
            println!("{}", "-".repeat(100));
            for r in &records {
                println!(
                    "{:<20} {:<9} {:<6} {:<5} {:>12} {:>12} {:>10} {:>+7.2}%  {}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.symbol,
                    r.kind.as_str(),
                    r.side.as_str(),
                    r.entry_price,
                    r.exit_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    r.quantity,
                    r.profit_pct * 100.0,
                    truncate(&r.reason, 30)
                );
            }

            println!("\n=== Performance ===");
            println!("{}", PerformanceSummary::from_records(&records));
        }

        Commands::Status => {
            let Some(state) = db.get_bot_state().await? else {
                println!("No bot session found. Run 'kellybot run' to start the bot.");
                return Ok(());
            };
            let total = db.count_trade_records().await?;
            let records = db.recent(HISTORY_KEEP).await?;

            println!("\n=== Bot Status ===");
            println!("Running:          {}", if state.is_running { "Yes" } else { "No" });
            println!("Symbol:           {}", state.symbol);
            println!("Mode:             {}", state.mode);
            println!("Started:          {}", state.started_at);
            println!(
                "Last Tick:        {}",
                state.last_tick_at.unwrap_or_else(|| "Never".to_string())
            );
            println!("Trade Records:    {}", total);

            println!("\n=== Performance ===");
            println!("{}", PerformanceSummary::from_records(&records));
        }

        Commands::Trim { keep } => {
            let removed = db.trim(keep).await?;
            println!("Removed {} trade records (kept newest {}).", removed, keep);
        }
    }

    Ok(())
}

/// Trade until stopped, rebuilding the exchange side on network switches.
async fn run(mut config: BotConfig, db: Arc<Database>) -> Result<()> {
    let channel: Arc<dyn NotificationChannel> = if config.telegram_enabled() {
        Arc::new(TelegramChannel::new(
            config.telegram_token.clone(),
            config.telegram_chat_id.clone(),
        ))
    } else {
        info!("Telegram not configured, notifications go to the log");
        Arc::new(LogChannel)
    };
    let (notifier, notify_worker) = Notifier::spawn(channel, config.notification_cooldown_secs);

    let (chat_tx, mut chat_rx) = mpsc::unbounded_channel();
    let listener = config.telegram_enabled().then(|| {
        tokio::spawn(
            TelegramCommandListener::new(
                config.telegram_token.clone(),
                config.telegram_chat_id.clone(),
            )
            .run(chat_tx),
        )
    });

    let removed = db.trim(HISTORY_KEEP).await?;
    if removed > 0 {
        info!(removed = removed, keep = HISTORY_KEEP, "Trimmed trade history");
    }

    println!("\n=== Kelly Futures Bot ===");
    println!("Symbol:    {} ({})", config.symbol, config.timeframe);
    println!("\nPress Ctrl+C to stop.\n");

    loop {
        info!(symbol = %config.symbol, mode = config.mode_name(), "Starting trading session");

        let exchange = Arc::new(BinanceClient::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.is_testnet,
        )?);

        let cache = Arc::new(MarketDataCache::new(config.cache_capacity));
        match exchange
            .bars(&config.symbol, &config.timeframe, config.cache_capacity)
            .await
        {
            Ok(bars) => {
                cache.seed(&config.symbol, &bars);
                info!(bars = bars.len(), "Bar cache warmed from REST");
            }
            Err(e) => warn!(error = %e, "Failed to warm bar cache"),
        }

        let ws_url = if config.is_testnet {
            TESTNET_WS_URL
        } else {
            MAINNET_WS_URL
        };
        let stream = tokio::spawn(
            KlineStream::new(ws_url, &config.symbol, &config.timeframe, cache.clone()).run(),
        );

        db.init_bot_state(&config.symbol, config.mode_name()).await?;

        let signals = Arc::new(MomentumSignals::new(config.momentum_config()));
        let ctx = TradingContext::new(
            config.clone(),
            exchange.clone(),
            signals,
            db.clone(),
            cache,
            notifier.clone(),
        );

        let mut handle = Runner::start(ctx);
        let mut states = handle.watch_state();

        let outcome = loop {
            tokio::select! {
                outcome = handle.wait() => break outcome,
                Ok(()) = states.changed() => {
                    if let Err(e) = db.record_tick().await {
                        warn!(error = %e, "Failed to record tick");
                    }
                }
                Some(command) = chat_rx.recv() => {
                    let session = ChatSession {
                        config: &config,
                        exchange: exchange.as_ref(),
                        handle: &handle,
                        notifier: &notifier,
                    };
                    if let Some(control) = session.respond(command).await {
                        handle.send(control);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    handle.stop();
                }
            }
        };

        stream.abort();

        match outcome {
            RunOutcome::Stopped => break,
            RunOutcome::SwitchMode { testnet } => {
                config.is_testnet = testnet;
                info!(mode = config.mode_name(), "Switching network");
                notifier.notify(format!("Switched to {}", config.mode_name()));
            }
        }
    }

    if let Some(listener) = listener {
        listener.abort();
    }
    db.mark_bot_stopped().await?;
    notifier.notify("Bot stopped");

    // the worker drains its queue once the last notifier is gone
    drop(notifier);
    if tokio::time::timeout(NOTIFY_FLUSH_TIMEOUT, notify_worker).await.is_err() {
        warn!("Timed out delivering final notifications");
    }
    println!("\nBot stopped.");

    Ok(())
}

/// Answers chat commands against the current trading session.
struct ChatSession<'a> {
    config: &'a BotConfig,
    exchange: &'a BinanceClient,
    handle: &'a TradingHandle,
    notifier: &'a Notifier,
}

impl ChatSession<'_> {
    /// Reply to informational commands; return control commands for the runner.
    async fn respond(&self, command: BotCommand) -> Option<ControlCommand> {
        match command {
            BotCommand::Status => {
                let positions = self.handle.active_positions().await;
                let mut text = format!(
                    "{} {} on {}: {}",
                    self.config.symbol,
                    self.config.timeframe,
                    self.config.mode_name(),
                    self.handle.state()
                );
                for p in positions.values() {
                    text.push_str(&format!(
                        "\n{} {} {} @ {} ({:+.2}%)",
                        p.side,
                        p.quantity,
                        p.symbol,
                        p.entry_price,
                        p.unrealized_pct() * 100.0
                    ));
                }
                self.notifier.notify(text);
                None
            }
            BotCommand::Balance => {
                match self.exchange.balance().await {
                    Ok(balance) => {
                        let value = balance.to_f64().unwrap_or(0.0);
                        self.notifier.notify(format!(
                            "Balance: {} USDT ({:+.2}% since start)",
                            balance,
                            growth_pct(value, self.config.initial_balance) * 100.0
                        ));
                    }
                    Err(e) => self.notifier.notify(format!("Balance unavailable: {}", e)),
                }
                None
            }
            BotCommand::Performance => {
                match self.handle.trade_history(HISTORY_KEEP).await {
                    Ok(records) => self
                        .notifier
                        .notify(PerformanceSummary::from_records(&records).to_string()),
                    Err(e) => warn!(error = %e, "Failed to load trade history"),
                }
                None
            }
            BotCommand::Mode => {
                self.notifier
                    .notify(format!("Mode: {}", self.config.mode_name()));
                None
            }
            BotCommand::Pause => Some(ControlCommand::Pause),
            BotCommand::Resume => Some(ControlCommand::Resume),
            BotCommand::Testnet => Some(ControlCommand::SwitchMode { testnet: true }),
            BotCommand::Real => Some(ControlCommand::SwitchMode { testnet: false }),
            BotCommand::Stop => Some(ControlCommand::Stop),
        }
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
