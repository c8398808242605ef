//! # Configuration Management Module
//!
//! Type-safe TOML configuration with validation and sensible defaults.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [transport]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [link]
//! command_timeout_ms = 10000
//! auto_reconnect = true
//! max_reconnect_attempts = 3
//! reconnect_base_delay_ms = 2000
//! heartbeat_interval_ms = 10000
//! rate_limit_enabled = true
//! rate_limit_per_second = 20
//!
//! [ota]
//! chunk_size = 256
//! finish_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! max_entries = 1000
//! ```
//!
//! CLI arguments override config file values, which override defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::link::LinkOptions;
use crate::transport::TransportConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Serial device path, e.g. `/dev/ttyUSB0`. May be left empty and
    /// supplied on the command line instead.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSection {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Zero disables the automatic heartbeat.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: usize,
}

fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_base_delay_ms() -> u64 {
    2_000
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_rate_limit_per_second() -> usize {
    20
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            auto_reconnect: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            rate_limit_enabled: true,
            rate_limit_per_second: default_rate_limit_per_second(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_finish_timeout_ms")]
    pub finish_timeout_ms: u64,
}

fn default_chunk_size() -> usize {
    256
}
fn default_finish_timeout_ms() -> u64 {
    30_000
}

impl Default for OtaSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            finish_timeout_ms: default_finish_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Process log level: error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Cap on the in-memory log ring.
    #[serde(default = "default_log_max_entries")]
    pub max_entries: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_max_entries() -> usize {
    1000
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_entries: default_log_max_entries(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub ota: OtaSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Load and validate a config file.
    pub async fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("cannot read config {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| anyhow!("cannot parse config {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default config file, refusing to overwrite an existing one.
    pub async fn create_default(path: &str) -> Result<()> {
        if fs::try_exists(path).await.unwrap_or(false) {
            return Err(anyhow!("{} already exists", path));
        }
        let serialized = toml::to_string_pretty(&Config::default())?;
        fs::write(path, serialized).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.baud_rate == 0 {
            return Err(anyhow!("transport.baud_rate must be non-zero"));
        }
        if self.link.command_timeout_ms == 0 {
            return Err(anyhow!("link.command_timeout_ms must be non-zero"));
        }
        if self.link.rate_limit_enabled && self.link.rate_limit_per_second == 0 {
            return Err(anyhow!(
                "link.rate_limit_per_second must be non-zero when the limiter is enabled"
            ));
        }
        if !(16..=4096).contains(&self.ota.chunk_size) {
            return Err(anyhow!("ota.chunk_size must be between 16 and 4096"));
        }
        if self.logging.max_entries == 0 {
            return Err(anyhow!("logging.max_entries must be non-zero"));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(anyhow!("unknown logging.level '{}'", other)),
        }
        Ok(())
    }

    /// Project this configuration onto link-layer options.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            transport: TransportConfig {
                port: self.transport.port.clone(),
                baud_rate: self.transport.baud_rate,
                ..TransportConfig::default()
            },
            command_timeout: Duration::from_millis(self.link.command_timeout_ms),
            auto_reconnect: self.link.auto_reconnect,
            max_reconnect_attempts: self.link.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(self.link.reconnect_base_delay_ms),
            heartbeat_interval: Duration::from_millis(self.link.heartbeat_interval_ms),
            rate_limit_enabled: self.link.rate_limit_enabled,
            rate_limit_per_second: self.link.rate_limit_per_second,
            ota_chunk_size: self.ota.chunk_size,
            ota_finish_timeout: Duration::from_millis(self.ota.finish_timeout_ms),
            log_capacity: self.logging.max_entries,
            ..LinkOptions::default()
        }
    }
}
