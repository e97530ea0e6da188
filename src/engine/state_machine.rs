//! Per-symbol trade lifecycle: FLAT -> ENTERING -> OPEN -> EXITING -> FLAT.
//!
//! Each [`TradeStateMachine::tick`] first reconciles with the exchange, then
//! advances at most one entry or one exit. Balance and positions are always
//! fetched fresh; nothing about the account is cached between ticks.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::TickError;
use crate::exchange::MarketOrder;
use crate::models::{interval_millis, Bar, Position, PositionSide, TradeRecord};
use crate::risk::{
    leverage_cap, order_quantity, portfolio_heat, size_position, update_risk_profile,
};
use crate::signal::{EntrySignal, SignalContext};

use super::TradingContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeState {
    Flat,
    Entering,
    Open,
    Exiting,
}

impl TradeState {
    /// True while a position exists or is being closed.
    pub fn holds_position(&self) -> bool {
        matches!(self, TradeState::Open | TradeState::Exiting)
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeState::Flat => "FLAT",
            TradeState::Entering => "ENTERING",
            TradeState::Open => "OPEN",
            TradeState::Exiting => "EXITING",
        };
        f.write_str(s)
    }
}

/// Our view of the position currently held.
#[derive(Debug, Clone)]
struct OpenTrade {
    position: Position,
    /// Indicator snapshot taken when the entry signal fired
    context: SignalContext,
    /// Set once the exit evaluator asked to close
    exit_reason: Option<String>,
}

pub struct TradeStateMachine {
    ctx: TradingContext,
    state: TradeState,
    open: Option<OpenTrade>,
    paused: bool,
}

impl TradeStateMachine {
    pub fn new(ctx: TradingContext) -> Self {
        Self {
            ctx,
            state: TradeState::Flat,
            open: None,
            paused: false,
        }
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn context(&self) -> &TradingContext {
        &self.ctx
    }

    /// While paused no new entries are made; open positions are still managed.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!(symbol = %self.ctx.symbol(), paused = paused, "Entry pause changed");
        }
        self.paused = paused;
    }

    #[cfg(test)]
    pub fn position(&self) -> Option<&Position> {
        self.open.as_ref().map(|o| &o.position)
    }

    /// Advance the lifecycle by one step.
    pub async fn tick(&mut self) -> Result<TradeState, TickError> {
        debug!(symbol = %self.ctx.symbol(), state = %self.state, "Tick");

        self.reconcile().await?;

        match self.state {
            TradeState::Flat => self.try_enter().await?,
            TradeState::Open => self.check_exit().await?,
            TradeState::Exiting => self.close_position().await?,
            TradeState::Entering => {
                // An entry never spans ticks; anything left here was interrupted
                warn!(symbol = %self.ctx.symbol(), "Stale ENTERING state, resetting");
                self.state = TradeState::Flat;
            }
        }

        Ok(self.state)
    }

    /// Align local state with the exchange position.
    async fn reconcile(&mut self) -> Result<(), TickError> {
        let symbol = self.ctx.symbol().to_string();
        let live = self.ctx.exchange.position(&symbol).await?;

        match (self.state, live) {
            (TradeState::Flat, Some(position)) => {
                warn!(
                    symbol = %symbol,
                    side = %position.side,
                    quantity = %position.quantity,
                    "Adopting position found on exchange"
                );
                self.ctx.notifier.notify(format!(
                    "Adopted existing {} {} position ({} @ {})",
                    symbol, position.side, position.quantity, position.entry_price
                ));
                self.open = Some(OpenTrade {
                    position: position.clone(),
                    context: SignalContext::new(),
                    exit_reason: None,
                });
                self.publish(Some(position)).await;
                self.state = TradeState::Open;
            }
            (TradeState::Open | TradeState::Exiting, None) => {
                self.record_external_close().await?;
            }
            (TradeState::Open | TradeState::Exiting, Some(live)) => {
                if let Some(open) = self.open.as_mut() {
                    open.position.mark_price = live.mark_price;
                    open.position.quantity = live.quantity;
                    if live.entry_price > Decimal::ZERO {
                        open.position.entry_price = live.entry_price;
                    }
                    let position = open.position.clone();
                    self.publish(Some(position)).await;
                }
            }
            _ => {}
        }

        Ok(())
    }

    async fn record_external_close(&mut self) -> Result<(), TickError> {
        let Some(open) = self.open.take() else {
            self.state = TradeState::Flat;
            return Ok(());
        };
        let position = open.position;
        let exit_price = self.exit_price(&position);
        let profit_pct = position.profit_pct_at(exit_price.to_f64().unwrap_or(0.0));

        warn!(
            symbol = %position.symbol,
            profit_pct = profit_pct,
            "Position closed outside the bot"
        );

        self.state = TradeState::Flat;
        self.publish(None).await;
        self.ctx.notifier.notify(format!(
            "{} {} closed externally ({:+.2}%)",
            position.symbol,
            position.side,
            profit_pct * 100.0
        ));

        let record = TradeRecord::exit(
            &position.symbol,
            position.side,
            position.entry_price,
            exit_price,
            position.quantity,
            profit_pct,
            "Closed externally",
        );
        self.ctx.trade_log.append(&record).await?;
        Ok(())
    }

    /// Most recent bars, from the stream cache or from REST when the cache
    /// is short or its newest bar is stale.
    ///
    /// REST bars are merged into the cache, so the next tick is served from it.
    async fn recent_bars(&self) -> Result<Vec<Bar>, TickError> {
        let symbol = self.ctx.symbol();
        let limit = self.ctx.config.bar_lookback;

        let cached = self.ctx.cache.snapshot(symbol, limit);
        match cached.last().map(|last| (last.open_time, self.is_stale(last))) {
            Some((_, false)) => return Ok(cached),
            Some((open_time, true)) => warn!(
                symbol = %symbol,
                open_time = open_time,
                "Cached bars are stale, fetching over REST"
            ),
            None => debug!(symbol = %symbol, "Bar cache short, fetching over REST"),
        }

        let bars = self
            .ctx
            .exchange
            .bars(symbol, &self.ctx.config.timeframe, limit)
            .await?;
        if bars.is_empty() {
            return Err(TickError::NoMarketData(symbol.to_string()));
        }
        self.ctx.cache.seed(symbol, &bars);

        let merged = self.ctx.cache.snapshot(symbol, limit);
        Ok(if merged.is_empty() { bars } else { merged })
    }

    fn is_stale(&self, bar: &Bar) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        interval_millis(&self.ctx.config.timeframe)
            .is_some_and(|interval_ms| bar.is_stale_at(interval_ms, now_ms))
    }

    async fn try_enter(&mut self) -> Result<(), TickError> {
        if self.paused {
            debug!(symbol = %self.ctx.symbol(), "Paused, skipping entry check");
            return Ok(());
        }

        let open_positions = self.ctx.exchange.open_positions().await?;
        if open_positions.len() >= self.ctx.config.max_open_positions {
            debug!(
                open = open_positions.len(),
                max = self.ctx.config.max_open_positions,
                "No free position slot"
            );
            return Ok(());
        }

        let balance = self.ctx.exchange.balance().await?.to_f64().unwrap_or(0.0);
        let heat = portfolio_heat(&open_positions, balance);
        if let Some(reason) = heat.fallback_reason() {
            warn!(?reason, "Portfolio heat fell back to default");
        }
        let heat = heat.value();
        if heat.threshold_exceeded {
            info!(
                heat = heat.total_heat_pct,
                threshold = heat.threshold_used,
                "Portfolio heat exceeded, skipping entry"
            );
            return Ok(());
        }

        let bars = self.recent_bars().await?;
        if let Some(last) = bars.last().filter(|b| self.is_stale(b)) {
            warn!(
                symbol = %self.ctx.symbol(),
                open_time = last.open_time,
                "No fresh bars, skipping entry"
            );
            return Ok(());
        }
        let signal = self.ctx.signals.evaluate_entry(&bars);

        let Some(side) = signal.action.side() else {
            debug!(reason = %signal.reason, "No entry signal");
            return Ok(());
        };
        if signal.confidence < self.ctx.config.min_entry_confidence {
            debug!(
                confidence = signal.confidence,
                min = self.ctx.config.min_entry_confidence,
                "Entry signal below confidence threshold"
            );
            return Ok(());
        }

        self.state = TradeState::Entering;
        match self.enter(side, signal, balance, &bars).await {
            Ok(()) => Ok(()),
            Err(TickError::InsufficientQuantity { quantity, min_qty }) => {
                warn!(quantity = %quantity, min_qty = %min_qty, "Entry skipped, quantity too small");
                self.ctx.notifier.notify(format!(
                    "Entry skipped on {}: quantity {} below minimum {}",
                    self.ctx.symbol(),
                    quantity,
                    min_qty
                ));
                self.state = TradeState::Flat;
                Ok(())
            }
            Err(e) => {
                if self.state == TradeState::Entering {
                    error!(error = %e, "Entry failed, back to FLAT");
                    self.ctx
                        .notifier
                        .notify(format!("Entry failed on {}: {}", self.ctx.symbol(), e));
                    self.state = TradeState::Flat;
                }
                Err(e)
            }
        }
    }

    async fn enter(
        &mut self,
        side: PositionSide,
        signal: EntrySignal,
        balance: f64,
        bars: &[Bar],
    ) -> Result<(), TickError> {
        let symbol = self.ctx.symbol().to_string();
        let price = bars.last().map(|b| b.close).unwrap_or(0.0);

        let history = self
            .ctx
            .trade_log
            .recent_exits(self.ctx.config.risk_lookback)
            .await?;
        let profile = update_risk_profile(&history);

        let sizing = size_position(balance, profile.kelly_pct, signal.confidence);
        if let Some(reason) = sizing.fallback_reason() {
            warn!(?reason, "Sizing fell back to conservative decision");
        }
        let decision = sizing.value();
        let leverage = decision.order_leverage().min(leverage_cap(balance));

        let filters = self.ctx.exchange.symbol_filters(&symbol).await?;
        let quantity = order_quantity(decision.risk_amount, leverage, price, &filters)?;

        info!(
            symbol = %symbol,
            side = %side,
            confidence = signal.confidence,
            kelly = profile.kelly_pct,
            risk_pct = decision.risk_pct,
            risk_amount = decision.risk_amount,
            leverage = leverage,
            quantity = %quantity,
            "Entering position"
        );

        self.ctx.exchange.set_leverage(&symbol, leverage).await?;
        let ack = self
            .ctx
            .exchange
            .submit_market_order(&MarketOrder::open(&symbol, side.entry_order_side(), quantity))
            .await?;

        let entry_price = if ack.avg_price > Decimal::ZERO {
            ack.avg_price
        } else {
            Decimal::try_from(price).unwrap_or(Decimal::ZERO)
        };
        let filled = if ack.executed_qty > Decimal::ZERO {
            ack.executed_qty
        } else {
            quantity
        };

        let position = Position::new(symbol.clone(), side, entry_price, filled, leverage);
        self.open = Some(OpenTrade {
            position: position.clone(),
            context: signal.context.clone(),
            exit_reason: None,
        });
        self.state = TradeState::Open;
        self.publish(Some(position)).await;

        info!(
            order_id = ack.order_id,
            client_order_id = %ack.client_order_id,
            status = %ack.status,
            entry_price = %entry_price,
            "Position opened"
        );
        self.ctx.notifier.notify(format!(
            "Opened {} {} {} @ {} ({}x, confidence {:.0})",
            side, filled, symbol, entry_price, leverage, signal.confidence
        ));

        let record = TradeRecord::entry(
            &symbol,
            side,
            entry_price,
            filled,
            signal.confidence,
            signal.reason,
        );
        self.ctx.trade_log.append(&record).await?;
        Ok(())
    }

    async fn check_exit(&mut self) -> Result<(), TickError> {
        let Some(open) = self.open.as_ref() else {
            self.state = TradeState::Flat;
            return Ok(());
        };

        let bars = match self.recent_bars().await {
            Ok(bars) => bars,
            Err(TickError::NoMarketData(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let price = self.exit_price(&open.position).to_f64().unwrap_or(0.0);

        let exit = self
            .ctx
            .signals
            .evaluate_exit(&open.position, price, &bars, &open.context);
        if !exit.should_exit() {
            debug!(
                symbol = %open.position.symbol,
                unrealized = open.position.profit_pct_at(price),
                "Holding position"
            );
            return Ok(());
        }

        info!(
            symbol = %open.position.symbol,
            reason = %exit.reason,
            urgency = ?exit.urgency,
            "Exit signal"
        );
        if let Some(open) = self.open.as_mut() {
            open.exit_reason = Some(exit.reason.to_string());
        }
        self.state = TradeState::Exiting;
        self.close_position().await
    }

    /// Reduce-only close of the full quantity. Failures leave EXITING for retry.
    async fn close_position(&mut self) -> Result<(), TickError> {
        let Some(open) = self.open.clone() else {
            self.state = TradeState::Flat;
            return Ok(());
        };
        let position = open.position;
        let reason = open.exit_reason.unwrap_or_else(|| "exit".to_string());

        let order = MarketOrder::close(
            &position.symbol,
            position.side.exit_order_side(),
            position.quantity,
        );
        let ack = match self.ctx.exchange.submit_market_order(&order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(symbol = %position.symbol, error = %e, "Close failed, will retry");
                self.ctx.notifier.notify(format!(
                    "Close failed on {}: {} (retrying)",
                    position.symbol, e
                ));
                return Err(e.into());
            }
        };

        let exit_price = self.exit_price(&position);
        let profit_pct = position.profit_pct_at(exit_price.to_f64().unwrap_or(0.0));

        self.open = None;
        self.state = TradeState::Flat;
        self.publish(None).await;

        info!(
            symbol = %position.symbol,
            order_id = ack.order_id,
            client_order_id = %ack.client_order_id,
            exit_price = %exit_price,
            profit_pct = profit_pct,
            reason = %reason,
            "Position closed"
        );
        self.ctx.notifier.notify(format!(
            "Closed {} {} @ {} ({:+.2}%, {})",
            position.side,
            position.symbol,
            exit_price,
            profit_pct * 100.0,
            reason
        ));

        let record = TradeRecord::exit(
            &position.symbol,
            position.side,
            position.entry_price,
            exit_price,
            position.quantity,
            profit_pct,
            reason,
        );
        self.ctx.trade_log.append(&record).await?;
        Ok(())
    }

    /// Mark price if the exchange reported one, else the latest cached close.
    fn exit_price(&self, position: &Position) -> Decimal {
        if position.mark_price > Decimal::ZERO {
            return position.mark_price;
        }
        self.ctx
            .cache
            .latest(&position.symbol)
            .and_then(|bar| Decimal::try_from(bar.close).ok())
            .unwrap_or(position.entry_price)
    }

    async fn publish(&self, position: Option<Position>) {
        let mut book = self.ctx.positions.write().await;
        match position {
            Some(p) => {
                book.insert(p.symbol.clone(), p);
            }
            None => {
                book.remove(self.ctx.symbol());
            }
        }
    }
}
