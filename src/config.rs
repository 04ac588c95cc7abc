//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `brewdash.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the controller lives (rig directory, system ws).
//!     - ChannelsConfig: reconnect policy and SockJS addressing.
//!     - HistoryConfig: backfill path and the initial retention window.
//!     - ApiConfig: bind address of the JSON view API.
//!     - LoggingConfig: log level and per-patch reading logs.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::{resolve_ws_url, Backoff, ReconnectPolicy};
use crate::domain::RetentionWindow;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub rigs_path: String,
    pub system_ws_path: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            rigs_path: "/rigs".to_string(),
            system_ws_path: "/controllers/System/ws".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelsConfig {
    /// address the SockJS raw websocket endpoint (`.../websocket`)
    pub sockjs_raw: bool,
    pub reconnect_delay_ms: u64,
    /// > reconnect_delay_ms switches to exponential backoff
    pub reconnect_max_delay_ms: u64,
    /// 0 = unbounded
    pub max_reconnect_attempts: u32,
    /// a connection open this long resets the attempt count
    pub stable_after_ms: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            sockjs_raw: true,
            reconnect_delay_ms: 0,
            reconnect_max_delay_ms: 0,
            max_reconnect_attempts: 0,
            stable_after_ms: 5000,
        }
    }
}

impl ChannelsConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let base = Duration::from_millis(self.reconnect_delay_ms);
        let backoff = if self.reconnect_delay_ms == 0 {
            Backoff::Immediate
        } else if self.reconnect_max_delay_ms > self.reconnect_delay_ms {
            Backoff::Exponential {
                base,
                max: Duration::from_millis(self.reconnect_max_delay_ms),
            }
        } else {
            Backoff::Fixed(base)
        };
        ReconnectPolicy {
            backoff,
            max_attempts: (self.max_reconnect_attempts > 0).then_some(self.max_reconnect_attempts),
            stable_after: Duration::from_millis(self.stable_after_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: String,
    pub default_window_minutes: RetentionWindow,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: "/datahistory".to_string(),
            default_window_minutes: RetentionWindow::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_readings: true,
        }
    }
}

impl DashConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load with default fallback
    ///
    /// runs before the tracing subscriber exists, so it reports on stdout
    pub fn load_or_default(explicit: Option<PathBuf>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path],
            None => vec![
                PathBuf::from("config").join("brewdash.toml"),
                PathBuf::from("..").join("config").join("brewdash.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// websocket address of the System controller (command channel)
    pub fn system_ws_url(&self) -> crate::error::Result<String> {
        resolve_ws_url(
            &self.server.base_url,
            &self.server.system_ws_path,
            self.channels.sockjs_raw,
        )
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│         DASHBOARD CONFIGURATION         │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Controller: {}", self.server.base_url);
        println!("│ Window: {} min", self.history.default_window_minutes.minutes());
        println!("│ Reconnect: {:?}", self.channels.reconnect_policy().backoff);
        println!("│ API: {}", self.api.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
