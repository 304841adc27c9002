// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct KucoinConfig {
    // Credentials stay optional here; the signer rejects missing ones.
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_futures_base_url")]
    pub futures_base_url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    #[default]
    Polling,
    Streaming,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub symbol: String,
    pub amount: Decimal,
    pub profit_ratio: Decimal,
    /// Candle granularity and profit-watch window, in minutes.
    pub interval: u32,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_t3_period")]
    pub t3_period: usize,
    #[serde(default = "default_volume_factor")]
    pub volume_factor: f64,
    #[serde(default)]
    pub watch_mode: WatchMode,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    #[serde(default)]
    pub tick_size: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default)]
    pub incremental: bool,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kucoin: KucoinConfig,
    pub strategy: StrategyConfig,
    #[serde(default = "default_http_retry")]
    pub http_retry: RetryConfig,
    #[serde(default = "default_ws_retry")]
    pub ws_retry: RetryConfig,
    #[serde(default = "default_receive_timeout_secs")]
    pub ws_receive_timeout_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

fn default_base_url() -> String {
    "https://api.kucoin.com".to_string()
}

fn default_futures_base_url() -> String {
    "https://api-futures.kucoin.com".to_string()
}

fn default_leverage() -> u32 {
    1
}

fn default_t3_period() -> usize {
    6
}

fn default_volume_factor() -> f64 {
    0.5
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_lot_size() -> Decimal {
    Decimal::ONE
}

fn default_http_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        delay_ms: 1_000,
        incremental: true,
    }
}

fn default_ws_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        delay_ms: 2_000,
        incremental: false,
    }
}

fn default_receive_timeout_secs() -> u64 {
    60
}

fn default_log_dir() -> String {
    "logs".to_string()
}
