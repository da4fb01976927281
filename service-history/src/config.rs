//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: HISTORY_, nested keys separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/service-history/config.toml
//! 4. System directory: /etc/service-history/config.toml
//! 5. Default values
//!
//! This is the *local* service configuration. The log destination itself is
//! resolved at call time from the remote configuration service described by
//! the `[appconfig]` section.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HISTORY_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Remote configuration service
    #[serde(default)]
    pub appconfig: AppConfigSettings,

    /// Log store backend
    #[serde(default)]
    pub log_store: LogStoreConfig,

    /// Range query tuning
    #[serde(default)]
    pub query: QueryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Invocation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Remote configuration service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfigSettings {
    /// Application identifier
    #[serde(default = "default_application_id")]
    pub application_id: String,

    /// Environment identifier
    #[serde(default = "default_environment_id")]
    pub environment_id: String,

    /// Configuration profile identifier
    #[serde(default = "default_profile_id")]
    pub profile_id: String,

    /// Client identifier reported to the configuration service
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Configuration service base URL
    ///
    /// When absent, a static payload built from `static_destination` is served.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key naming the destination inside the configuration payload
    #[serde(default = "default_destination_key")]
    pub destination_key: String,

    /// How long a resolved destination stays fresh
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Destination served by the static source
    #[serde(default = "default_static_destination")]
    pub static_destination: String,

    /// Per-request timeout for the configuration service
    #[serde(default = "default_appconfig_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AppConfigSettings {
    fn default() -> Self {
        Self {
            application_id: default_application_id(),
            environment_id: default_environment_id(),
            profile_id: default_profile_id(),
            client_id: default_client_id(),
            endpoint: None,
            destination_key: default_destination_key(),
            cache_ttl_secs: default_cache_ttl(),
            static_destination: default_static_destination(),
            request_timeout_secs: default_appconfig_request_timeout(),
        }
    }
}

impl AppConfigSettings {
    /// Cache freshness window as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Which log store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreBackend {
    /// In-process store (local development and tests)
    #[default]
    Memory,
    /// Remote log-search service over HTTP
    Http,
}

/// Log store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: LogStoreBackend,

    /// Base URL (required for the `http` backend)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_log_store_request_timeout")]
    pub request_timeout_secs: u64,

    /// Polls the memory store reports `Running` before completing
    #[serde(default = "default_memory_pending_polls")]
    pub memory_pending_polls: u32,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            backend: LogStoreBackend::default(),
            endpoint: None,
            request_timeout_secs: default_log_store_request_timeout(),
            memory_pending_polls: default_memory_pending_polls(),
        }
    }
}

impl LogStoreConfig {
    /// Request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Range query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Delay between poll calls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of poll calls per query
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Window length used when `start` is omitted
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,

    /// Maximum rows requested from the backend
    #[serde(default = "default_result_limit")]
    pub result_limit: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            default_window_secs: default_window_secs(),
            result_limit: default_result_limit(),
        }
    }
}

impl QueryConfig {
    /// Poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time the poll loop may spend sleeping
    ///
    /// `None` when `interval × attempts` does not fit in a `Duration`.
    pub fn poll_budget(&self) -> Option<Duration> {
        self.poll_interval().checked_mul(self.max_poll_attempts)
    }

    /// Default window length as Duration
    pub fn default_window(&self) -> Duration {
        Duration::from_secs(self.default_window_secs)
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_application_id() -> String {
    "ServiceHistoryApp".to_string()
}

fn default_environment_id() -> String {
    "Production".to_string()
}

fn default_profile_id() -> String {
    "ServiceHistoryConfig".to_string()
}

fn default_client_id() -> String {
    "ServiceHistoryService".to_string()
}

fn default_destination_key() -> String {
    "logGroup".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_static_destination() -> String {
    "service-history".to_string()
}

fn default_appconfig_request_timeout() -> u64 {
    5
}

fn default_log_store_request_timeout() -> u64 {
    10
}

fn default_memory_pending_polls() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    3600
}

fn default_result_limit() -> u32 {
    10_000
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Files are merged lowest priority first:
    /// 1. /etc/service-history/config.toml
    /// 2. ~/.config/service-history/config.toml
    /// 3. ./config.toml
    ///
    /// Environment variables (HISTORY_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Find all possible config file paths
    ///
    /// Returns paths in priority order (highest first).
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("service-history");
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/service-history/config.toml"));
        paths
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// The poll loop must finish strictly inside the invocation timeout so
    /// there is time left to normalize and respond.
    pub fn validate(&self) -> Result<()> {
        if self.query.poll_interval_ms == 0 {
            return Err(Error::Internal(
                "query.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.query.max_poll_attempts == 0 {
            return Err(Error::Internal(
                "query.max_poll_attempts must be greater than zero".to_string(),
            ));
        }
        let budget = self.query.poll_budget().ok_or_else(|| {
            Error::Internal(
                "query.poll_interval_ms * query.max_poll_attempts overflows".to_string(),
            )
        })?;
        if budget >= self.invocation_timeout() {
            return Err(Error::Internal(format!(
                "query poll budget ({:?}) must be below service.timeout_secs ({}s)",
                budget, self.service.timeout_secs
            )));
        }
        if self.log_store.backend == LogStoreBackend::Http && self.log_store.endpoint.is_none() {
            return Err(Error::Internal(
                "log_store.endpoint is required for the http backend".to_string(),
            ));
        }
        if self.appconfig.destination_key.trim().is_empty() {
            return Err(Error::Internal(
                "appconfig.destination_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Invocation timeout as Duration
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_secs)
    }

    /// Hard deadline for a single query's poll loop
    ///
    /// One interval of slack past the poll budget, capped at the midpoint
    /// between the budget and the invocation timeout.
    pub fn query_timeout(&self) -> Duration {
        let budget = self.query.poll_budget().unwrap_or(Duration::MAX);
        let invocation = self.invocation_timeout();
        let with_slack = budget.saturating_add(self.query.poll_interval());
        let cap = budget + invocation.saturating_sub(budget) / 2;
        with_slack.min(cap)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "service-history".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
            },
            appconfig: AppConfigSettings::default(),
            log_store: LogStoreConfig::default(),
            query: QueryConfig::default(),
        }
    }
}
