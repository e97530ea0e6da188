//! Bot configuration: defaults, optional JSON file, then environment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::models::interval_millis;
use crate::signal::MomentumConfig;

/// Full bot configuration.
///
/// Unknown keys in the config file are ignored; missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    // === Market ===
    /// Futures symbol traded by this instance
    pub symbol: String,

    /// Kline interval, e.g. "5m"
    pub timeframe: String,

    /// Starting capital, used for growth reporting
    pub initial_balance: f64,

    /// Maximum concurrent open positions on the account
    pub max_open_positions: usize,

    pub is_testnet: bool,

    // === Credentials ===
    pub api_key: String,
    pub api_secret: String,
    pub telegram_token: String,
    pub telegram_chat_id: String,

    // === Data ===
    /// Bars kept in memory per symbol
    pub cache_capacity: usize,

    /// Bars handed to the signal provider
    pub bar_lookback: usize,

    /// Closed trades used for the risk profile
    pub risk_lookback: usize,

    // === Behaviour ===
    /// Minimum entry confidence (0-100), inclusive
    pub min_entry_confidence: f64,

    /// Identical notifications are suppressed for this long
    pub notification_cooldown_secs: u64,

    pub database_url: String,

    // === Exit rules ===
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_holding_hours: i64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: "5m".to_string(),
            initial_balance: 5.0,                // $5 starting capital
            max_open_positions: 1,
            is_testnet: true,

            api_key: String::new(),
            api_secret: String::new(),
            telegram_token: String::new(),
            telegram_chat_id: String::new(),

            cache_capacity: 100,
            bar_lookback: 50,
            risk_lookback: 50,

            min_entry_confidence: 60.0,
            notification_cooldown_secs: 30,
            database_url: "sqlite:./kellybot.db?mode=rwc".to_string(),

            take_profit_pct: 0.02,               // 2% target
            stop_loss_pct: 0.03,                 // 3% emergency stop
            max_holding_hours: 12,
        }
    }
}

impl BotConfig {
    /// Load from `path` (if it exists) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::resolve(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, file and environment merged, without validation.
    ///
    /// Used by read-only commands that never touch the exchange.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(p) if p.exists() => {
                info!(path = %p.display(), "Loading config file");
                Self::from_file(p)?
            }
            Some(p) => {
                debug!(path = %p.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("BINANCE_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = non_empty("BINANCE_API_SECRET") {
            self.api_secret = v;
        }
        if let Some(v) = non_empty("TELEGRAM_TOKEN") {
            self.telegram_token = v;
        }
        if let Some(v) = non_empty("TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = v;
        }
        if let Some(v) = non_empty("BOT_SYMBOL") {
            self.symbol = v.trim().to_uppercase();
        }
        if let Some(v) = non_empty("BOT_TIMEFRAME") {
            self.timeframe = v.trim().to_string();
        }
        if let Some(v) = non_empty("BOT_TESTNET") {
            self.is_testnet = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Reject configurations the bot cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Missing("symbol"));
        }
        if self.timeframe.trim().is_empty() {
            return Err(ConfigError::Missing("timeframe"));
        }
        if interval_millis(&self.timeframe).is_none() {
            return Err(ConfigError::Invalid {
                field: "timeframe",
                reason: format!("unknown kline interval '{}'", self.timeframe),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("BINANCE_API_KEY"));
        }
        if self.api_secret.trim().is_empty() {
            return Err(ConfigError::Missing("BINANCE_API_SECRET"));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.bar_lookback == 0 || self.bar_lookback > self.cache_capacity {
            return Err(ConfigError::Invalid {
                field: "bar_lookback",
                reason: format!("must be between 1 and cache_capacity ({})", self.cache_capacity),
            });
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_open_positions",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_entry_confidence) {
            return Err(ConfigError::Invalid {
                field: "min_entry_confidence",
                reason: "must be within 0-100".to_string(),
            });
        }
        Ok(())
    }

    pub fn mode_name(&self) -> &'static str {
        if self.is_testnet {
            "testnet"
        } else {
            "mainnet"
        }
    }

    pub fn telegram_enabled(&self) -> bool {
        !self.telegram_token.is_empty() && !self.telegram_chat_id.is_empty()
    }

    /// Exit rules for the baseline signal provider.
    pub fn momentum_config(&self) -> MomentumConfig {
        MomentumConfig {
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
            max_holding_hours: self.max_holding_hours,
            ..MomentumConfig::default()
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: mask(&self.api_key),
            api_secret: mask(&self.api_secret),
            telegram_token: mask(&self.telegram_token),
            ..self.clone()
        }
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_credentials() -> BotConfig {
        BotConfig {
            api_key: "key".into(),
            api_secret: "secret".into(),
            ..BotConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.timeframe, "5m");
        assert_eq!(config.initial_balance, 5.0);
        assert_eq!(config.max_open_positions, 1);
        assert!(config.is_testnet);
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.min_entry_confidence, 60.0);
        assert_eq!(config.notification_cooldown_secs, 30);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = BotConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BINANCE_API_KEY")));

        let config = BotConfig {
            api_key: "key".into(),
            ..BotConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("BINANCE_API_SECRET"))
        ));
        assert!(with_credentials().validate().is_ok());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let config = BotConfig {
            symbol: "  ".into(),
            ..with_credentials()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing("symbol"))));
    }

    #[test]
    fn test_unknown_timeframe_rejected() {
        let config = BotConfig {
            timeframe: "7x".into(),
            ..with_credentials()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "timeframe", .. })
        ));
    }

    #[test]
    fn test_lookback_must_fit_cache() {
        let config = BotConfig {
            bar_lookback: 120,
            ..with_credentials()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "bar_lookback", .. })
        ));

        let config = BotConfig {
            cache_capacity: 0,
            ..with_credentials()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "cache_capacity", .. })
        ));
    }

    #[test]
    fn test_file_ignores_unknown_keys() {
        let json = r#"{"symbol": "ETHUSDT", "modal_awal": 5.0, "leverage": 2, "is_testnet": false}"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.symbol, "ETHUSDT");
        assert!(!config.is_testnet);
        assert_eq!(config.timeframe, "5m");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BINANCE_API_KEY", "k"),
            ("BINANCE_API_SECRET", "s"),
            ("BOT_SYMBOL", "solusdt"),
            ("BOT_TESTNET", "false"),
            ("TELEGRAM_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let mut config = BotConfig {
            telegram_token: "from-file".into(),
            ..BotConfig::default()
        };
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key, "k");
        assert_eq!(config.symbol, "SOLUSDT");
        assert!(!config.is_testnet);
        // empty values do not clobber the file
        assert_eq!(config.telegram_token, "from-file");
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = BotConfig::from_file(Path::new("/nonexistent/kellybot.json")).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }

    #[test]
    fn test_redacted() {
        let config = BotConfig {
            api_secret: "abcdefgh".into(),
            ..with_credentials()
        };
        let shown = config.redacted();
        assert_eq!(shown.api_secret, "abcd****");
        assert_eq!(shown.api_key, "key****");
        assert_eq!(shown.telegram_token, "");
        assert_eq!(shown.symbol, config.symbol);
    }
}
