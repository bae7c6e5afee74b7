//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml
//! structure. Credentials may come from the environment instead of the
//! file (`.env` is loaded at startup).

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveTime;
use serde::Deserialize;
use thiserror::Error;

use crate::application::{CoordinatorSettings, SellStrategy, TradingWindow};

/// Main configuration structure matching config.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerSection,
    #[serde(default)]
    pub trading: TradingSection,
    /// Named sell strategies, selected by `trading.active_strategy`.
    #[serde(default)]
    pub strategies: HashMap<String, StrategySection>,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Broker credentials and environment selection.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    /// Application key issued by the brokerage (or `APP_KEY` env var).
    #[serde(default)]
    pub app_key: String,
    /// Application secret (or `APP_SECRET` env var).
    #[serde(default)]
    pub app_secret: String,
    /// Use the paper-trading endpoints instead of production.
    #[serde(default)]
    pub use_mock: bool,
}

impl BrokerSection {
    /// App key with environment override: `APP_KEY` wins when set.
    pub fn resolved_app_key(&self) -> String {
        std::env::var("APP_KEY").unwrap_or_else(|_| self.app_key.clone())
    }

    /// App secret with environment override: `APP_SECRET` wins when set.
    pub fn resolved_app_secret(&self) -> String {
        std::env::var("APP_SECRET").unwrap_or_else(|_| self.app_secret.clone())
    }
}

/// Trading parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSection {
    /// Condition channel subscribed at startup.
    #[serde(default = "default_condition_seq")]
    pub condition_seq: String,
    /// Maximum price per share the auto-buy will pay (won).
    #[serde(default = "default_buy_amount")]
    pub buy_amount: i64,
    /// Maximum number of concurrently open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Trading window start, HH:MM.
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// Trading window end, HH:MM.
    #[serde(default = "default_end_time")]
    pub end_time: String,
    /// Name of the sell strategy active at startup.
    #[serde(default = "default_active_strategy")]
    pub active_strategy: String,
}

impl Default for TradingSection {
    fn default() -> Self {
        Self {
            condition_seq: default_condition_seq(),
            buy_amount: default_buy_amount(),
            max_positions: default_max_positions(),
            start_time: default_start_time(),
            end_time: default_end_time(),
            active_strategy: default_active_strategy(),
        }
    }
}

/// One named sell strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    /// Stop-loss threshold in percent; must be negative.
    pub stop_loss_pct: f64,
    /// Take-profit threshold in percent; must be positive.
    pub take_profit_pct: f64,
}

/// Logging configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to file (in addition to stdout)
    #[serde(default)]
    pub log_to_file: bool,
    /// Log file path
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
        }
    }
}

fn default_condition_seq() -> String {
    "0".to_string()
}
fn default_buy_amount() -> i64 {
    5_000
}
fn default_max_positions() -> usize {
    10
}
fn default_start_time() -> String {
    "09:00".to_string()
}
fn default_end_time() -> String {
    "15:30".to_string()
}
fn default_active_strategy() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> String {
    "logs/sentry-trader.log".to_string()
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.resolved_app_key().is_empty() {
            return Err(ConfigError::ValidationError(
                "broker.app_key missing (config or APP_KEY env)".to_string(),
            ));
        }
        if self.broker.resolved_app_secret().is_empty() {
            return Err(ConfigError::ValidationError(
                "broker.app_secret missing (config or APP_SECRET env)".to_string(),
            ));
        }

        if self.trading.buy_amount < 1_000 {
            return Err(ConfigError::ValidationError(format!(
                "buy_amount must be >= 1000 won, got {}",
                self.trading.buy_amount
            )));
        }
        if self.trading.max_positions < 1 || self.trading.max_positions > 50 {
            return Err(ConfigError::ValidationError(format!(
                "max_positions must be 1-50, got {}",
                self.trading.max_positions
            )));
        }
        if self.trading.condition_seq.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "condition_seq cannot be empty".to_string(),
            ));
        }

        let start = parse_time(&self.trading.start_time)?;
        let end = parse_time(&self.trading.end_time)?;
        if start >= end {
            return Err(ConfigError::ValidationError(format!(
                "trading window start ({}) must precede end ({})",
                self.trading.start_time, self.trading.end_time
            )));
        }

        if !self.strategies.is_empty() {
            if !self.strategies.contains_key(&self.trading.active_strategy) {
                return Err(ConfigError::ValidationError(format!(
                    "active_strategy '{}' is not defined under [strategies]",
                    self.trading.active_strategy
                )));
            }
            for (name, strategy) in &self.strategies {
                if strategy.take_profit_pct <= 0.0 {
                    return Err(ConfigError::ValidationError(format!(
                        "strategy '{name}': take_profit_pct must be > 0, got {}",
                        strategy.take_profit_pct
                    )));
                }
                if strategy.stop_loss_pct >= 0.0 {
                    return Err(ConfigError::ValidationError(format!(
                        "strategy '{name}': stop_loss_pct must be < 0, got {}",
                        strategy.stop_loss_pct
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build the coordinator's runtime settings.
    pub fn coordinator_settings(&self) -> Result<CoordinatorSettings, ConfigError> {
        let window = TradingWindow {
            start: parse_time(&self.trading.start_time)?,
            end: parse_time(&self.trading.end_time)?,
        };

        let mut strategies: HashMap<String, SellStrategy> = self
            .strategies
            .iter()
            .map(|(name, s)| {
                (
                    name.clone(),
                    SellStrategy {
                        stop_loss_pct: s.stop_loss_pct,
                        take_profit_pct: s.take_profit_pct,
                    },
                )
            })
            .collect();
        if strategies.is_empty() {
            strategies.insert(self.trading.active_strategy.clone(), SellStrategy::default());
        }

        Ok(CoordinatorSettings {
            condition_seq: self.trading.condition_seq.clone(),
            buy_amount: self.trading.buy_amount,
            max_positions: self.trading.max_positions,
            window,
            strategies,
            active_strategy: self.trading.active_strategy.clone(),
            ..CoordinatorSettings::default()
        })
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| {
        ConfigError::ValidationError(format!("invalid time '{raw}' (expected HH:MM): {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[broker]
app_key = "test-key"
app_secret = "test-secret"
use_mock = true

[trading]
condition_seq = "3"
buy_amount = 10000
max_positions = 5
start_time = "09:00"
end_time = "15:30"
active_strategy = "default"

[strategies.default]
stop_loss_pct = -2.0
take_profit_pct = 3.0

[strategies.scalp]
stop_loss_pct = -1.5
take_profit_pct = 1.5

[logging]
level = "info"
log_to_file = false
log_file = "logs/sentry-trader.log"
"#
        .to_string()
    }

    fn load_from_str(content: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load_config(file.path())
    }

    #[test]
    fn test_load_valid_config() {
        let config = load_from_str(&create_valid_config()).unwrap();
        assert_eq!(config.broker.app_key, "test-key");
        assert!(config.broker.use_mock);
        assert_eq!(config.trading.condition_seq, "3");
        assert_eq!(config.trading.buy_amount, 10_000);
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_defaults_applied_when_sections_omitted() {
        let config = load_from_str(
            r#"
[broker]
app_key = "k"
app_secret = "s"
"#,
        )
        .unwrap();
        assert_eq!(config.trading.condition_seq, "0");
        assert_eq!(config.trading.buy_amount, 5_000);
        assert_eq!(config.trading.max_positions, 10);
        assert!(!config.logging.log_to_file);

        let settings = config.coordinator_settings().unwrap();
        // no [strategies] table falls back to the built-in thresholds
        assert_eq!(
            settings.strategies.get("default").unwrap().take_profit_pct,
            3.0
        );
    }

    #[test]
    fn test_invalid_buy_amount() {
        let mut content = create_valid_config();
        content = content.replace("buy_amount = 10000", "buy_amount = 500");
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_invalid_max_positions() {
        let mut content = create_valid_config();
        content = content.replace("max_positions = 5", "max_positions = 99");
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_invalid_time_format() {
        let mut content = create_valid_config();
        content = content.replace("start_time = \"09:00\"", "start_time = \"9 AM\"");
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_window_must_be_ordered() {
        let mut content = create_valid_config();
        content = content.replace("end_time = \"15:30\"", "end_time = \"08:00\"");
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_unknown_active_strategy_rejected() {
        let mut content = create_valid_config();
        content = content.replace(
            "active_strategy = \"default\"",
            "active_strategy = \"missing\"",
        );
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_strategy_threshold_signs() {
        let mut content = create_valid_config();
        content = content.replace("stop_loss_pct = -1.5", "stop_loss_pct = 1.5");
        let result = load_from_str(&content);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_coordinator_settings_conversion() {
        let config = load_from_str(&create_valid_config()).unwrap();
        let settings = config.coordinator_settings().unwrap();
        assert_eq!(settings.condition_seq, "3");
        assert_eq!(settings.buy_amount, 10_000);
        assert_eq!(settings.max_positions, 5);
        assert_eq!(
            settings.window.start,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(settings.strategies.get("scalp").unwrap().stop_loss_pct, -1.5);
        assert_eq!(settings.active_strategy, "default");
    }
}
