//! Flytrap CLI configuration management
//!
//! Configuration is layered, highest priority last:
//! - Built-in defaults
//! - Configuration file (`flytrap.toml` in the working directory, or
//!   `~/.flytrap/config.toml`, or an explicit `--config` path)
//! - Environment variables (`FLYTRAP_*`)
//!
//! The file uses plain integers for durations (`*_ms`, `*_secs`) and is
//! converted into the typed [`FlytrapConfig`] the engine consumes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flytrap_core::{ApiConfig, FlytrapConfig, ReconcileConfig, StoreConfig, TransportConfig};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Flytrap CLI application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Live event stream settings
    pub transport: TransportSection,

    /// Engagement service settings
    pub api: ApiSection,

    /// Session store settings
    pub store: StoreSection,

    /// Message reconciliation settings
    pub reconcile: ReconcileSection,

    /// Console-specific settings
    pub console: ConsoleConfig,
}

/// Live event stream settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// WebSocket endpoint of the engagement server
    pub url: String,

    /// Fixed delay between reconnect attempts, in milliseconds
    pub reconnect_delay_ms: u64,

    /// How many reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Outbound frame queue depth
    pub outbound_buffer: usize,
}

/// Engagement service settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL of the engagement service
    pub base_url: String,

    /// Per-request timeout, in seconds
    pub request_timeout_secs: u64,

    /// Page size used when hydrating session history
    pub history_page_size: u32,
}

/// Session store settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Maximum messages kept in the local log
    pub max_messages: usize,
}

/// Reconciliation settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSection {
    /// Timestamp tolerance for echo matching, in milliseconds
    pub timestamp_tolerance_ms: u64,
}

/// Console-specific configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prompt shown in the interactive console
    pub prompt: String,

    /// Whether to show typing indicators from the live stream
    pub show_typing: bool,

    /// How many recent messages a transcript listing shows
    pub transcript_window: usize,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for TransportSection {
    fn default() -> Self {
        let core = TransportConfig::default();
        Self {
            url: core.url,
            reconnect_delay_ms: core.reconnect_delay.as_millis() as u64,
            max_reconnect_attempts: core.max_reconnect_attempts,
            outbound_buffer: core.outbound_buffer,
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        let core = ApiConfig::default();
        Self {
            base_url: core.base_url,
            request_timeout_secs: core.request_timeout.as_secs(),
            history_page_size: core.history_page_size,
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            max_messages: StoreConfig::default().max_messages,
        }
    }
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            timestamp_tolerance_ms: ReconcileConfig::default().timestamp_tolerance.as_millis()
                as u64,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: "flytrap> ".to_string(),
            show_typing: true,
            transcript_window: 20,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportSection::default(),
            api: ApiSection::default(),
            store: StoreSection::default(),
            reconcile: ReconcileSection::default(),
            console: ConsoleConfig::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration with the standard priority order:
    /// 1. Environment variables (highest priority)
    /// 2. Configuration file
    /// 3. Default values (lowest priority)
    ///
    /// With no explicit path, `flytrap.toml` in the working directory is
    /// preferred over `~/.flytrap/config.toml`; both are optional.
    pub fn load(explicit_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(Path::new(path))?,
            None => match Self::find_config_file() {
                Some(path) => {
                    debug!(path = %path.display(), "loading configuration file");
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ConfigError::FileSystem(format!("failed to read {}: {err}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|err| {
            ConfigError::Loading(format!("failed to parse {}: {err}", path.display()))
        })
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from("flytrap.toml");
        if local.is_file() {
            return Some(local);
        }
        let home = dirs::home_dir()?.join(".flytrap").join("config.toml");
        home.is_file().then_some(home)
    }

    /// Apply `FLYTRAP_*` overrides from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLYTRAP_WS_URL") {
            self.transport.url = url;
        }
        if let Some(url) = lookup("FLYTRAP_API_URL") {
            self.api.base_url = url;
        }
        if let Some(value) = lookup("FLYTRAP_RECONNECT_DELAY_MS") {
            self.transport.reconnect_delay_ms = parse_env("FLYTRAP_RECONNECT_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("FLYTRAP_MAX_RECONNECT_ATTEMPTS") {
            self.transport.max_reconnect_attempts =
                parse_env("FLYTRAP_MAX_RECONNECT_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("FLYTRAP_PAGE_SIZE") {
            self.api.history_page_size = parse_env("FLYTRAP_PAGE_SIZE", &value)?;
        }
        if let Some(value) = lookup("FLYTRAP_MAX_MESSAGES") {
            self.store.max_messages = parse_env("FLYTRAP_MAX_MESSAGES", &value)?;
        }
        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flytrap().validate().map_err(ConfigError::Validation)?;
        if self.console.prompt.is_empty() {
            return Err(ConfigError::Validation(
                "console prompt must not be empty".to_string(),
            ));
        }
        if self.console.transcript_window == 0 {
            return Err(ConfigError::Validation(
                "transcript window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The typed engine configuration this file describes.
    pub fn flytrap(&self) -> FlytrapConfig {
        FlytrapConfig {
            transport: TransportConfig {
                url: self.transport.url.clone(),
                reconnect_delay: Duration::from_millis(self.transport.reconnect_delay_ms),
                max_reconnect_attempts: self.transport.max_reconnect_attempts,
                outbound_buffer: self.transport.outbound_buffer,
            },
            api: ApiConfig {
                base_url: self.api.base_url.clone(),
                request_timeout: Duration::from_secs(self.api.request_timeout_secs),
                history_page_size: self.api.history_page_size,
            },
            store: StoreConfig {
                max_messages: self.store.max_messages,
            },
            reconcile: ReconcileConfig {
                timestamp_tolerance: Duration::from_millis(self.reconcile.timestamp_tolerance_ms),
            },
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&AppConfig::default())
            .unwrap_or_else(|_| "# failed to generate example config".to_string())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| {
        ConfigError::Environment(format!("could not parse {key}={value}"))
    })
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

impl From<ConfigError> for crate::error::CliError {
    fn from(err: ConfigError) -> Self {
        crate::error::CliError::Config(err.to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
