//! Inbound chat commands over Telegram long polling.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::TELEGRAM_API_URL;

/// Commands an operator can send from the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Status,
    Balance,
    Performance,
    Mode,
    Pause,
    Resume,
    /// Switch to the futures testnet
    Testnet,
    /// Switch to mainnet
    Real,
    Stop,
}

impl BotCommand {
    /// Parse `/status`, `/status@my_bot` or a bare `status`.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.trim_start_matches('/');
        let word = word.split('@').next().unwrap_or(word);

        match word.to_lowercase().as_str() {
            "status" => Some(BotCommand::Status),
            "balance" => Some(BotCommand::Balance),
            "performance" | "perf" => Some(BotCommand::Performance),
            "mode" => Some(BotCommand::Mode),
            "pause" => Some(BotCommand::Pause),
            "resume" => Some(BotCommand::Resume),
            "testnet" => Some(BotCommand::Testnet),
            "real" | "mainnet" => Some(BotCommand::Real),
            "stop" => Some(BotCommand::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Polls `getUpdates` and forwards commands from the configured chat.
pub struct TelegramCommandListener {
    http: reqwest::Client,
    token: String,
    chat_id: String,
    offset: i64,
}

/// Seconds Telegram holds a `getUpdates` request open.
const LONG_POLL_SECS: u64 = 30;

impl TelegramCommandListener {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
                .build()
                .unwrap_or_default(),
            token,
            chat_id,
            offset: 0,
        }
    }

    /// Poll until the receiving side is dropped.
    pub async fn run(mut self, commands: mpsc::UnboundedSender<BotCommand>) {
        info!("Listening for chat commands");
        while !commands.is_closed() {
            match self.poll_once().await {
                Ok(batch) => {
                    for command in batch {
                        if commands.send(command).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Command poll failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
        debug!("Command listener stopped");
    }

    async fn poll_once(&mut self) -> Result<Vec<BotCommand>> {
        let url = format!("{}/bot{}/getUpdates", TELEGRAM_API_URL, self.token);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
            ])
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let body: UpdatesResponse = response
            .json()
            .await
            .context("Failed to decode getUpdates response")?;
        if !body.ok {
            bail!(
                "Telegram getUpdates failed: {}",
                body.description.unwrap_or_default()
            );
        }

        Ok(self.accept(body.result))
    }

    /// Advance the offset past `updates` and keep commands from our chat.
    fn accept(&mut self, updates: Vec<Update>) -> Vec<BotCommand> {
        let mut out = Vec::new();
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);

            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != self.chat_id {
                debug!(chat = message.chat.id, "Ignoring message from unknown chat");
                continue;
            }
            if let Some(command) = message.text.as_deref().and_then(BotCommand::parse) {
                info!(?command, "Chat command received");
                out.push(command);
            }
        }
        out
    }
}
