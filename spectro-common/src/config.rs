//! Configuration loading and validation
//!
//! The dashboard reads one TOML file at startup. Resolution order for the
//! file path:
//! 1. Command-line argument (highest priority)
//! 2. `SPECTRO_DASHBOARD_CONFIG` environment variable
//! 3. `spectro-dashboard.toml` in the working directory
//!
//! Every field except `[[sources]]` has a built-in default. Configuration
//! problems are fatal at startup.

use crate::elements::{ElementOrder, DEFAULT_DISPLAY_ELEMENTS, DEFAULT_REPORTING_ELEMENTS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SPECTRO_DASHBOARD_CONFIG";

/// Config file looked up when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "spectro-dashboard.toml";

/// Top-level dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Number of latest results returned to clients
    #[serde(default = "default_number_of_results")]
    pub number_of_results: usize,

    /// Period (s) between dashboard page reloads, served to the static page
    #[serde(default = "default_client_refresh_interval")]
    pub client_refresh_interval: u64,

    /// Lifetime (s) of a cached merge result
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Period (s) of the background refresh that keeps the reporting sink fed
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Compute the first merge before the HTTP server starts accepting requests
    #[serde(default)]
    pub warm_cache_on_start: bool,

    /// Elements shown to clients, in slot order
    #[serde(default = "default_display_elements")]
    pub display_elements: Vec<String>,

    /// Elements written to the reporting database, in column order
    #[serde(default = "default_reporting_elements")]
    pub reporting_elements: Vec<String>,

    /// Directory of static dashboard files served at `/`
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Verbose logging of SQL and watermarks
    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Result sources, merged in the order listed
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Optional reporting (warehouse) database
    #[serde(default)]
    pub reporting: Option<ReportingConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One configured result source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Spectrometer's embedded result database file
    LocalDb { path: PathBuf, source_id: u32 },

    /// Directory of spectrometer XML result files
    XmlDir { path: PathBuf, source_id: u32 },

    /// Another dashboard instance, consumed through its HTTP API
    RemotePeer {
        address: String,
        source_id: u32,
        #[serde(default = "default_peer_timeout_secs")]
        timeout_secs: u64,
    },
}

impl SourceConfig {
    pub fn source_id(&self) -> u32 {
        match self {
            SourceConfig::LocalDb { source_id, .. }
            | SourceConfig::XmlDir { source_id, .. }
            | SourceConfig::RemotePeer { source_id, .. } => *source_id,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceConfig::RemotePeer { .. })
    }
}

/// Reporting database target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportingConfig {
    /// sqlx connection URL
    pub database_url: String,

    /// Table receiving one row per sample
    #[serde(default = "default_reporting_table")]
    pub table: String,

    /// Create the table at startup when missing
    #[serde(default)]
    pub create_table: bool,

    /// Batches queued for the writer before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_http_port() -> u16 {
    80
}

fn default_number_of_results() -> usize {
    20
}

fn default_client_refresh_interval() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    5
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_display_elements() -> Vec<String> {
    DEFAULT_DISPLAY_ELEMENTS.iter().map(|s| s.to_string()).collect()
}

fn default_reporting_elements() -> Vec<String> {
    DEFAULT_REPORTING_ELEMENTS.iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_peer_timeout_secs() -> u64 {
    10
}

fn default_reporting_table() -> String {
    "spectro_results".to_string()
}

fn default_queue_capacity() -> usize {
    8
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            number_of_results: default_number_of_results(),
            client_refresh_interval: default_client_refresh_interval(),
            cache_ttl_secs: default_cache_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            warm_cache_on_start: false,
            display_elements: default_display_elements(),
            reporting_elements: default_reporting_elements(),
            static_dir: None,
            debug_mode: false,
            logging: LoggingConfig::default(),
            sources: Vec::new(),
            reporting: None,
        }
    }
}

impl DashboardConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DashboardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config(
                "at least one [[sources]] entry is required".to_string(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(Error::Config("cache_ttl_secs must be positive".to_string()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }

        self.display_order()?;
        self.reporting_order()?;

        for source in &self.sources {
            match source {
                SourceConfig::LocalDb { path, .. } | SourceConfig::XmlDir { path, .. } => {
                    if path.as_os_str().is_empty() {
                        return Err(Error::Config(format!(
                            "source {} has an empty path",
                            source.source_id()
                        )));
                    }
                }
                SourceConfig::RemotePeer {
                    address,
                    timeout_secs,
                    ..
                } => {
                    if address.trim().is_empty() {
                        return Err(Error::Config(format!(
                            "remote peer source {} has an empty address",
                            source.source_id()
                        )));
                    }
                    if *timeout_secs == 0 {
                        return Err(Error::Config(format!(
                            "remote peer source {} needs a positive timeout_secs",
                            source.source_id()
                        )));
                    }
                }
            }
        }

        if let Some(reporting) = &self.reporting {
            if reporting.database_url.trim().is_empty() {
                return Err(Error::Config(
                    "reporting.database_url must not be empty".to_string(),
                ));
            }
            if !is_valid_identifier(&reporting.table) {
                return Err(Error::Config(format!(
                    "invalid reporting table name: {}",
                    reporting.table
                )));
            }
            if let Some(bad) = self
                .reporting_elements
                .iter()
                .find(|el| !is_valid_identifier(el))
            {
                return Err(Error::Config(format!(
                    "invalid reporting element column: {}",
                    bad
                )));
            }
            if reporting.queue_capacity == 0 {
                return Err(Error::Config(
                    "reporting.queue_capacity must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Client-facing element slot layout
    pub fn display_order(&self) -> Result<ElementOrder> {
        ElementOrder::new(self.display_elements.iter().cloned())
            .map_err(|e| Error::Config(format!("display_elements: {}", e)))
    }

    /// Reporting column layout
    pub fn reporting_order(&self) -> Result<ElementOrder> {
        ElementOrder::new(self.reporting_elements.iter().cloned())
            .map_err(|e| Error::Config(format!("reporting_elements: {}", e)))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Effective log level (`debug_mode` forces at least debug)
    pub fn effective_log_level(&self) -> &str {
        if self.debug_mode && matches!(self.logging.level.as_str(), "info" | "warn" | "error") {
            "debug"
        } else {
            &self.logging.level
        }
    }
}

/// SQL identifier check for table and column names spliced into statements
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() < 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Resolve the config file path following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: Working directory default
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load and validate the config file
pub fn load_config(path: &Path) -> Result<DashboardConfig> {
    debug!("Reading configuration from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read config file {}: {}", path.display(), e))
    })?;

    let config = DashboardConfig::from_toml_str(&content)?;
    info!(
        "Loaded configuration: {} source(s), {} result(s), reporting {}",
        config.sources.len(),
        config.number_of_results,
        if config.reporting.is_some() { "enabled" } else { "disabled" }
    );
    Ok(config)
}
