use std::time::Duration;

use config::{Config, File};
pub use config::ConfigError;
use serde::Deserialize;

use crate::client::ReconnectPolicy;

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Settings {
    /// Push endpoint configuration (host, transport security)
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Reconnection and keepalive configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Batching configuration for the rendering layer
    #[serde(default)]
    pub batch: BatchConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    /// Host (and optional port) serving the dashboard, e.g. "desk.example.com"
    #[serde(default = "default_host")]
    pub host: String,
    /// Use wss instead of ws; matches the security of the hosting page
    #[serde(default)]
    pub secure: bool,
}

impl EndpointConfig {
    /// URL of the live push endpoint
    pub fn live_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/ws/live", scheme, self.host)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            secure: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt (doubles per attempt)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on the reconnect delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failed attempts after which no further reconnect is scheduled
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Interval between keepalive pings while connected; 0 disables them
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl ReconnectConfig {
    /// Backoff policy derived from this configuration
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }

    /// Keepalive ping interval (zero = disabled)
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_keepalive_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct BatchConfig {
    /// Fixed batching window for render flushes
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl BatchConfig {
    /// Batch window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

fn default_window_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Add configuration file
            .add_source(File::with_name(config_path))
            // Add environment variables (overrides file)
            // e.g. APP_ENDPOINT__HOST=desk.example.com
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
