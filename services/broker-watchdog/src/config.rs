//! Configuration types for the broker watchdog service

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::EndpointKind;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub errors: MonitorConfig,
    #[serde(default)]
    pub orders: MonitorConfig,
    #[serde(default)]
    pub streams: StreamMonitorConfig,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// Endpoint configuration with tagged enum for extensibility
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EndpointConfig {
    #[serde(rename = "rest")]
    Rest {
        name: String,
        base_url: String,
        /// Path polled with GET to keep the endpoint state current
        #[serde(default)]
        probe_path: Option<String>,
        #[serde(default = "default_probe_interval")]
        probe_interval_seconds: u64,
    },
    #[serde(rename = "orders")]
    Orders { name: String, base_url: String },
    #[serde(rename = "stream")]
    Stream {
        name: String,
        url: String,
        #[serde(default)]
        subscribe: Option<serde_json::Value>,
        #[serde(default = "default_history_size")]
        history_size: usize,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_seconds: u64,
    },
}

impl EndpointConfig {
    pub fn name(&self) -> &str {
        match self {
            EndpointConfig::Rest { name, .. }
            | EndpointConfig::Orders { name, .. }
            | EndpointConfig::Stream { name, .. } => name,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            EndpointConfig::Rest { .. } => EndpointKind::Rest,
            EndpointConfig::Orders { .. } => EndpointKind::Orders,
            EndpointConfig::Stream { .. } => EndpointKind::Stream,
        }
    }
}

/// Settings shared by every watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Print every new log entry to stdout
    #[serde(default)]
    pub print: bool,
    /// Append-only log file; in-memory only when unset
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            print: false,
            log_path: None,
            scan_interval_ms: default_scan_interval(),
        }
    }
}

impl MonitorConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

/// Stream liveness watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMonitorConfig {
    #[serde(flatten)]
    pub monitor: MonitorConfig,
    /// Maximum age of the newest heartbeat before a stream counts as dead
    #[serde(default = "default_dead_on_arrival")]
    pub dead_on_arrival_seconds: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Restart counters are zeroed each time this window elapses
    #[serde(default = "default_reset_window")]
    pub reset_window_seconds: u64,
    /// Pause before and after starting a replacement stream
    #[serde(default = "default_restart_pause")]
    pub restart_pause_ms: u64,
}

impl Default for StreamMonitorConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            dead_on_arrival_seconds: default_dead_on_arrival(),
            max_restarts: default_max_restarts(),
            reset_window_seconds: default_reset_window(),
            restart_pause_ms: default_restart_pause(),
        }
    }
}

/// Broker API credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub key_id: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"***")
            .finish()
    }
}

fn default_probe_interval() -> u64 {
    30
}

fn default_history_size() -> usize {
    64
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_scan_interval() -> u64 {
    100
}

fn default_dead_on_arrival() -> u64 {
    30
}

fn default_max_restarts() -> u32 {
    3
}

fn default_reset_window() -> u64 {
    3600
}

fn default_restart_pause() -> u64 {
    2000
}

impl Config {
    /// Replace `${VAR}` credential values with the named environment variables
    pub fn resolve_secrets(&mut self) -> crate::Result<()> {
        if let Some(credentials) = &mut self.credentials {
            credentials.key_id = resolve_env(&credentials.key_id)?;
            credentials.secret_key = resolve_env(&credentials.secret_key)?;
        }
        Ok(())
    }

    /// Reject duplicate or empty endpoint names and zero stream windows
    pub fn validate(&self) -> crate::Result<()> {
        if self.streams.dead_on_arrival_seconds == 0 {
            return Err(crate::WatchdogError::Config(
                "streams.dead_on_arrival_seconds must be greater than zero".to_string(),
            ));
        }
        if self.streams.reset_window_seconds == 0 {
            return Err(crate::WatchdogError::Config(
                "streams.reset_window_seconds must be greater than zero".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            let name = endpoint.name();
            if name.trim().is_empty() {
                return Err(crate::WatchdogError::Config(
                    "Endpoint name must not be empty".to_string(),
                ));
            }
            if !seen.insert(name) {
                return Err(crate::WatchdogError::Config(format!(
                    "Duplicate endpoint name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn resolve_env(value: &str) -> crate::Result<String> {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).map_err(|_| {
            crate::WatchdogError::Config(format!("Environment variable {} is not set", var))
        }),
        None => Ok(value.to_string()),
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::WatchdogError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
