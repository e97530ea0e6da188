//! Tick loop, pacing and control commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::TradeLog;
use crate::models::{Position, TradeRecord};

use super::context::{PositionBook, TradingContext};
use super::state_machine::{TradeState, TradeStateMachine};

/// Delay between ticks while a position is open or being closed.
pub const OPEN_INTERVAL: Duration = Duration::from_secs(15);
/// Delay between ticks while flat.
pub const FLAT_INTERVAL: Duration = Duration::from_secs(30);
/// Delay after a failed tick.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Commands accepted by a running loop, applied between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
    /// No new entries; open positions are still managed
    Pause,
    Resume,
    /// Switch network; acted on once the machine is flat
    SwitchMode { testnet: bool },
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    /// The host should rebuild the exchange client for the new network
    SwitchMode { testnet: bool },
}

/// How long to wait before the next tick.
pub fn pacing(state: TradeState, had_error: bool) -> Duration {
    if had_error {
        ERROR_BACKOFF
    } else if state.holds_position() {
        OPEN_INTERVAL
    } else {
        FLAT_INTERVAL
    }
}

pub struct Runner {
    machine: TradeStateMachine,
    control: mpsc::UnboundedReceiver<ControlCommand>,
    state_tx: watch::Sender<TradeState>,
    pending_switch: Option<bool>,
}

impl Runner {
    /// Spawn the tick loop for `ctx` and return a handle to it.
    pub fn start(ctx: TradingContext) -> TradingHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TradeState::Flat);

        let positions = ctx.positions.clone();
        let trade_log = ctx.trade_log.clone();

        let runner = Runner {
            machine: TradeStateMachine::new(ctx),
            control: control_rx,
            state_tx,
            pending_switch: None,
        };
        let task = tokio::spawn(runner.run());

        TradingHandle {
            control: control_tx,
            state: state_rx,
            positions,
            trade_log,
            task,
        }
    }

    async fn run(mut self) -> RunOutcome {
        let symbol = self.machine.context().symbol().to_string();
        let notifier = self.machine.context().notifier.clone();
        info!(
            symbol = %symbol,
            mode = self.machine.context().config.mode_name(),
            "Trading loop started"
        );
        notifier.notify(format!(
            "Trading {} on {}",
            symbol,
            self.machine.context().config.mode_name()
        ));

        loop {
            while let Ok(command) = self.control.try_recv() {
                if let Some(outcome) = self.apply(command) {
                    return self.finish(outcome);
                }
            }
            if let Some(outcome) = self.switch_ready() {
                return self.finish(outcome);
            }

            let had_error = match self.machine.tick().await {
                Ok(state) => {
                    self.state_tx.send_replace(state);
                    false
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Tick failed");
                    notifier.notify(format!("Error on {}: {}", symbol, e));
                    self.state_tx.send_replace(self.machine.state());
                    true
                }
            };

            if let Some(outcome) = self.switch_ready() {
                return self.finish(outcome);
            }

            let delay = pacing(self.machine.state(), had_error);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                command = self.control.recv() => match command {
                    Some(command) => {
                        if let Some(outcome) = self.apply(command) {
                            return self.finish(outcome);
                        }
                    }
                    None => {
                        warn!("All trading handles dropped, stopping");
                        return self.finish(RunOutcome::Stopped);
                    }
                },
            }
        }
    }

    fn apply(&mut self, command: ControlCommand) -> Option<RunOutcome> {
        info!(?command, "Control command");
        match command {
            ControlCommand::Stop => Some(RunOutcome::Stopped),
            ControlCommand::Pause => {
                self.machine.set_paused(true);
                None
            }
            ControlCommand::Resume => {
                if self.pending_switch.is_none() {
                    self.machine.set_paused(false);
                }
                None
            }
            ControlCommand::SwitchMode { testnet } => {
                if testnet == self.machine.context().config.is_testnet {
                    info!(testnet = testnet, "Already on requested network");
                    return None;
                }
                // Hold off new entries until the switch happens
                self.pending_switch = Some(testnet);
                self.machine.set_paused(true);
                None
            }
        }
    }

    fn switch_ready(&self) -> Option<RunOutcome> {
        match self.pending_switch {
            Some(testnet) if self.machine.state() == TradeState::Flat => {
                Some(RunOutcome::SwitchMode { testnet })
            }
            _ => None,
        }
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        info!(outcome = ?outcome, state = %self.machine.state(), "Trading loop finished");
        outcome
    }
}

/// Host-side handle to a running loop.
pub struct TradingHandle {
    control: mpsc::UnboundedSender<ControlCommand>,
    state: watch::Receiver<TradeState>,
    positions: PositionBook,
    trade_log: Arc<dyn TradeLog>,
    task: JoinHandle<RunOutcome>,
}

impl TradingHandle {
    pub fn send(&self, command: ControlCommand) {
        if self.control.send(command).is_err() {
            warn!(?command, "Trading loop already finished");
        }
    }

    /// Ask the loop to stop; an in-flight tick completes first.
    pub fn stop(&self) {
        self.send(ControlCommand::Stop);
    }

    /// State after the most recent tick.
    pub fn state(&self) -> TradeState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TradeState> {
        self.state.clone()
    }

    /// Snapshot of open positions keyed by symbol.
    pub async fn active_positions(&self) -> HashMap<String, Position> {
        self.positions.read().await.clone()
    }

    /// Most recent trade records, oldest first.
    pub async fn trade_history(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        self.trade_log.recent(limit).await
    }

    /// Wait for the loop to finish.
    ///
    /// Safe to use as a `select!` branch; do not call again once it has returned.
    pub async fn wait(&mut self) -> RunOutcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Trading loop task failed");
                RunOutcome::Stopped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{harness, FakeExchange, FakeSignals};
    use crate::signal::EntryAction;
    use tokio_test::assert_ok;

    async fn wait_for(handle: &TradingHandle, target: TradeState) {
        let mut rx = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("runner dropped");
    }

    #[test]
    fn test_pacing() {
        assert_eq!(pacing(TradeState::Flat, false), Duration::from_secs(30));
        assert_eq!(pacing(TradeState::Open, false), Duration::from_secs(15));
        assert_eq!(pacing(TradeState::Exiting, false), Duration::from_secs(15));
        assert_eq!(pacing(TradeState::Open, true), Duration::from_secs(60));
        assert_eq!(pacing(TradeState::Flat, true), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let h = harness(FakeExchange::new(), FakeSignals::entering(EntryAction::Long, 90.0));
        let mut handle = Runner::start(h.ctx.clone());
        handle.stop();

        assert_eq!(handle.wait().await, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let h = harness(FakeExchange::new(), FakeSignals::entering(EntryAction::Long, 90.0));
        let mut handle = Runner::start(h.ctx.clone());

        wait_for(&handle, TradeState::Open).await;
        let positions = handle.active_positions().await;
        assert!(positions.contains_key("BTCUSDT"));
        assert_eq!(assert_ok!(handle.trade_history(10).await).len(), 1);

        handle.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_switch_mode_when_flat() {
        let h = harness(FakeExchange::new(), FakeSignals::entering(EntryAction::Hold, 0.0));
        let mut handle = Runner::start(h.ctx.clone());

        handle.send(ControlCommand::SwitchMode { testnet: false });
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::SwitchMode { testnet: false });
        assert!(h.exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_switch_to_current_mode_is_ignored() {
        let h = harness(FakeExchange::new(), FakeSignals::entering(EntryAction::Hold, 0.0));
        let mut handle = Runner::start(h.ctx.clone());

        handle.send(ControlCommand::SwitchMode { testnet: true });
        handle.stop();
        assert_eq!(handle.wait().await, RunOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_notifies_and_backs_off() {
        let exchange = FakeExchange::new();
        exchange.fail_next_orders(1);
        let mut h = harness(exchange, FakeSignals::entering(EntryAction::Long, 90.0));

        let started = tokio::time::Instant::now();
        let mut handle = Runner::start(h.ctx.clone());
        let mut states = handle.watch_state();
        assert_ok!(states.wait_for(|s| *s == TradeState::Open).await);

        // first entry failed, the retry waits out the full back-off
        let elapsed = started.elapsed();
        assert!(elapsed >= ERROR_BACKOFF, "retried after {:?}", elapsed);
        assert!(elapsed < ERROR_BACKOFF + Duration::from_secs(1), "retried after {:?}", elapsed);
        assert_eq!(h.exchange.orders().len(), 1);

        let mut messages = Vec::new();
        while let Ok(message) = h.notifications.try_recv() {
            messages.push(message);
        }
        assert!(
            messages.iter().any(|m| m.starts_with("Error on BTCUSDT")),
            "{:?}",
            messages
        );

        handle.stop();
        assert_eq!(handle.wait().await, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_controller_stops_loop() {
        let h = harness(FakeExchange::new(), FakeSignals::entering(EntryAction::Hold, 0.0));
        let TradingHandle { control, task, .. } = Runner::start(h.ctx.clone());
        drop(control);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
    }
}
