//! Application configuration.

use std::time::Duration;

use clotho_strategy::{ReconcileConfig, StrategyConfig};
use clotho_ws::{ConnectionConfig, SupervisorConfig};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Environment variable that overrides `exchange.api_secret`.
pub const API_SECRET_ENV: &str = "CLOTHO_API_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,

    /// Alerts go to the log only when absent.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Flatten the position after cancelling orders on shutdown.
    #[serde(default)]
    pub close_position_on_shutdown: bool,
}

#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub api_key: String,

    #[serde(default)]
    pub api_secret: String,

    /// Overrides `https://{host}`.
    #[serde(default)]
    pub rest_url: Option<String>,

    /// Overrides `wss://{host}/realtime`.
    #[serde(default)]
    pub ws_url: Option<String>,
}

fn default_host() -> String {
    "www.bitmex.com".to_string()
}

impl ExchangeConfig {
    pub fn rest_url(&self) -> String {
        self.rest_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", self.host))
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| format!("wss://{}/realtime", self.host))
    }
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("rest_url", &self.rest_url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub chat_id: String,
    pub token: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("chat_id", &self.chat_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Realtime session and supervisor timing.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Silence that marks an opened session stale.
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,

    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_failsafe_retry_ms")]
    pub failsafe_retry_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_stale_timeout_ms() -> u64 {
    120_000
}

fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_reconnect_interval_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_failsafe_retry_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: default_stale_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            failsafe_retry_ms: default_failsafe_retry_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl WebSocketConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            stale_timeout: Duration::from_millis(self.stale_timeout_ms),
            check_interval: Duration::from_millis(self.check_interval_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            failsafe_retry_delay: Duration::from_millis(self.failsafe_retry_ms),
        }
    }

    pub fn connection_config(&self, url: String, symbol: String) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..ConnectionConfig::new(url, symbol)
        }
    }

    pub fn failsafe_retry(&self) -> Duration {
        Duration::from_millis(self.failsafe_retry_ms)
    }
}

impl AppConfig {
    /// Loads, applies the secret override, and validates.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Ok(secret) = std::env::var(API_SECRET_ENV) {
            if !secret.is_empty() {
                config.exchange.api_secret = secret;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Checks everything that can be checked without the network.
    pub fn validate(&self) -> AppResult<()> {
        if self.exchange.api_key.trim().is_empty() {
            return Err(AppError::Config("exchange.api_key is empty".to_string()));
        }
        if self.exchange.api_secret.is_empty() {
            return Err(AppError::Config(format!(
                "exchange.api_secret is empty (set it in the file or via {API_SECRET_ENV})"
            )));
        }
        if self.websocket.max_reconnect_attempts == 0 {
            return Err(AppError::Config(
                "websocket.max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.websocket.check_interval_ms == 0 || self.websocket.reconnect_interval_ms == 0 {
            return Err(AppError::Config(
                "websocket intervals must be positive".to_string(),
            ));
        }
        self.strategy.validate()?;
        Ok(())
    }

    pub fn symbol(&self) -> String {
        self.strategy.pair.symbol()
    }
}
