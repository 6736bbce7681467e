//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml
//! structure. Secrets never live here: the oracle token comes from its own
//! secret file and exchange credentials from environment variables.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::domain::instrument::{self, Instrument};
use crate::domain::risk::RiskLimits;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub trading: TradingSection,
    pub risk: RiskSection,
    pub oracle: OracleSection,
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub blacklist: BlacklistSection,
    #[serde(default)]
    pub state: StateSection,
}

/// Trading loop section
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSection {
    /// Minutes between cycles
    pub interval_minutes: u64,
    /// Account value used when no state file exists yet
    pub initial_value: f64,
    /// Enabled coin symbols; must be a subset of the supported basket
    pub instruments: Vec<String>,
}

/// Risk limit section
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    /// Global leverage ceiling
    pub max_leverage: u32,
    /// Maximum share of account value risked on one new position
    pub risk_fraction: f64,
    /// Maximum simultaneous open positions
    pub max_positions: usize,
    /// Decisions below this confidence are rejected
    pub min_confidence: f64,
}

/// Decision oracle section
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSection {
    pub api_url: String,
    pub model: String,
    /// Path to the API credential file (supports ~)
    pub token_path: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

/// Exchange section
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSection {
    pub rest_url: String,
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

/// Volume blacklist section (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_volume")]
    pub min_volume_usd: f64,
    #[serde(default = "default_recheck_hours")]
    pub recheck_hours: i64,
}

impl Default for BlacklistSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_volume_usd: default_min_volume(),
            recheck_hours: default_recheck_hours(),
        }
    }
}

/// State persistence section (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_oracle_timeout() -> u64 {
    90
}
fn default_exchange_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_min_volume() -> f64 {
    1_000_000.0
}
fn default_recheck_hours() -> i64 {
    24
}
fn default_state_path() -> String {
    "data/trading_state.json".to_string()
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.interval_minutes == 0 {
            return Err(ConfigError::Validation(
                "interval_minutes must be > 0".to_string(),
            ));
        }
        if self.trading.initial_value <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "initial_value must be > 0, got {}",
                self.trading.initial_value
            )));
        }
        if self.trading.instruments.is_empty() {
            return Err(ConfigError::Validation(
                "at least one instrument must be enabled".to_string(),
            ));
        }
        let supported = instrument::default_basket();
        for symbol in &self.trading.instruments {
            if instrument::find(&supported, symbol).is_none() {
                return Err(ConfigError::Validation(format!(
                    "unsupported instrument {:?}",
                    symbol
                )));
            }
        }

        if self.risk.max_leverage == 0 {
            return Err(ConfigError::Validation(
                "max_leverage must be >= 1".to_string(),
            ));
        }
        if self.risk.risk_fraction <= 0.0 || self.risk.risk_fraction > 1.0 {
            return Err(ConfigError::Validation(format!(
                "risk_fraction must be in (0, 1], got {}",
                self.risk.risk_fraction
            )));
        }
        if self.risk.max_positions == 0 {
            return Err(ConfigError::Validation(
                "max_positions must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.risk.min_confidence) {
            return Err(ConfigError::Validation(format!(
                "min_confidence must be in [0, 1], got {}",
                self.risk.min_confidence
            )));
        }

        if self.oracle.timeout_secs == 0 || self.exchange.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeouts must be > 0".to_string(),
            ));
        }
        if self.blacklist.min_volume_usd < 0.0 {
            return Err(ConfigError::Validation(
                "min_volume_usd must not be negative".to_string(),
            ));
        }
        if self.blacklist.recheck_hours <= 0 {
            return Err(ConfigError::Validation(
                "recheck_hours must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The risk limits this configuration enforces
    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_leverage: self.risk.max_leverage,
            risk_fraction: self.risk.risk_fraction,
            max_positions: self.risk.max_positions,
            min_confidence: self.risk.min_confidence,
        }
    }

    /// The enabled instruments with their contract metadata
    pub fn basket(&self) -> Vec<Instrument> {
        instrument::default_basket()
            .into_iter()
            .filter(|i| self.trading.instruments.contains(&i.symbol))
            .collect()
    }
}
