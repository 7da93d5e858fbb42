use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH: &str = "figname.toml";

/// Client configuration from `figname.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub naming: NamingDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server origin; endpoint paths are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for the analyze and naming calls. 0 disables it.
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: 0,
        }
    }
}

/// Progress stream hardening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Reconnect attempts after the connection drops before a terminal event.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Longest gap between messages before the stream is declared stalled.
    /// 0 disables the check.
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
}

impl StreamConfig {
    pub fn silence_timeout(&self) -> Option<Duration> {
        (self.silence_timeout_secs > 0).then(|| Duration::from_secs(self.silence_timeout_secs))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_reconnects: default_max_reconnects(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            silence_timeout_secs: default_silence_timeout_secs(),
        }
    }
}

/// Defaults for the naming request, overridable per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingDefaults {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for NamingDefaults {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            platform: default_platform(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_reconnects() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_silence_timeout_secs() -> u64 {
    120
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_platform() -> String {
    "web".to_string()
}

/// Load configuration from `path`.
///
/// Falls back to defaults if the file is missing.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}
