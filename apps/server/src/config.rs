//! Application configuration.

use escrow_engine::{ForexTableFetcher, DEFAULT_THRESHOLD_PERCENT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket endpoint of the chain node.
    pub node_ws_url: String,
    /// SQLite database path or URL.
    pub database_url: String,
    /// Escrow contracts to monitor.
    pub contracts: Vec<ContractSettings>,
    /// Rate source endpoints.
    pub rates: RateSettings,
    /// Sniper alerting.
    pub sniper: SniperSettings,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_ws_url: "ws://127.0.0.1:8546".to_string(),
            database_url: "sqlite://escrow-sniper.db".to_string(),
            contracts: Vec::new(),
            rates: RateSettings::default(),
            sniper: SniperSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, falling back to defaults when the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NODE_WS_URL") {
            self.node_ws_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(chat) = std::env::var("BROADCAST_CHAT_ID") {
            self.sniper.broadcast_chat_id = Some(chat);
        }
    }
}

/// One escrow contract to track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSettings {
    pub address: String,
    pub label: String,
}

/// Market rate source endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// Forex table API base URL.
    pub forex_base_url: String,
    /// KRW dealer quote endpoint.
    pub regional_quote_url: String,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            forex_base_url: ForexTableFetcher::DEFAULT_BASE_URL.to_string(),
            regional_quote_url: "https://quotation-api-cdn.dunamu.com/v1/forex/recent?codes=FRX.KRWUSD".to_string(),
        }
    }
}

/// Sniper alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SniperSettings {
    /// Chat that receives every alert regardless of subscriptions.
    pub broadcast_chat_id: Option<String>,
    /// Discount threshold for subscriptions without their own.
    pub default_threshold_percent: f64,
}

impl Default for SniperSettings {
    fn default() -> Self {
        Self {
            broadcast_chat_id: None,
            default_threshold_percent: DEFAULT_THRESHOLD_PERCENT,
        }
    }
}
