//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/deltalens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/deltalens/` (~/.config/deltalens/)
//! - Data: `$XDG_DATA_HOME/deltalens/` (~/.local/share/deltalens/)
//! - State/Logs: `$XDG_STATE_HOME/deltalens/` (~/.local/state/deltalens/)
//!
//! The loaded [`Config`] is materialized once into an immutable [`InsightsSettings`]
//! value that the pipeline passes by reference to every stage.

use crate::error::{Error, Result};
use crate::types::SESSION_EVENT;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Properties dropped from every matched event before aggregation.
///
/// Referrers, raw URLs, timestamps and personal identifiers have near-unique
/// values and never survive feature selection, so they are removed up front.
pub const DEFAULT_PROPERTY_BLACKLIST: &[&str] = &[
    "$latest_referrer",
    "$latest_referrer_url",
    "$initial_referrer",
    "$initial_referrer_url",
    "$referrer",
    "$referrer_url",
    "$latest_page_url",
    "$latest_page_domain",
    "$latest_page_raw_url",
    "$latest_page_load_time",
    "$latest_page_spent_time",
    "$latest_page_scroll_percent",
    "$ip",
    "$timestamp",
    "$session_latest_page_url",
    "$browser_version",
    "$browser_with_version",
    "$day_of_first_event",
    "$device_brand",
    "$device_model",
    "$email",
    "$first_name",
    "$hour_of_first_event",
    "$hubspot_company_address",
    "$hubspot_company_createdate",
    "$hubspot_company_domain",
    "$hubspot_company_hs_object_id",
    "$hubspot_company_name",
    "$hubspot_company_phone",
    "$hubspot_company_website",
    "$hubspot_contact_address",
    "$hubspot_contact_createdate",
    "$hubspot_contact_email",
    "$hubspot_contact_firstname",
    "$hubspot_contact_full_name",
    "$hubspot_contact_hs_analytics_first_url",
    "$hubspot_contact_hs_analytics_last_url",
];

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Insight computation configuration
    #[serde(default)]
    pub insights: InsightsConfig,

    /// Property allow/deny lists
    #[serde(default)]
    pub properties: PropertiesConfig,

    /// KPI thresholds
    #[serde(default)]
    pub kpi: KpiConfig,

    /// Snapshot store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Insight computation configuration
#[derive(Debug, Deserialize)]
pub struct InsightsConfig {
    /// K for top-K feature selection; -1 disables capping
    #[serde(default = "default_top_k")]
    pub top_k: i64,

    /// Name of the event that opens a session
    #[serde(default = "default_session_event")]
    pub session_event: String,

    /// Distance in seconds between the two compared windows
    #[serde(default = "default_period_shift_secs")]
    pub period_shift_secs: i64,

    /// Insights per list in the top-N report
    #[serde(default = "default_report_records")]
    pub report_records: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            session_event: default_session_event(),
            period_shift_secs: default_period_shift_secs(),
            report_records: default_report_records(),
        }
    }
}

fn default_top_k() -> i64 {
    10
}

fn default_session_event() -> String {
    SESSION_EVENT.to_string()
}

fn default_period_shift_secs() -> i64 {
    7 * 24 * 60 * 60
}

fn default_report_records() -> usize {
    5
}

/// Property deny-list configuration
#[derive(Debug, Deserialize)]
pub struct PropertiesConfig {
    /// Replaces the built-in deny-list when set
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,

    /// Appended to `blacklist`
    #[serde(default)]
    pub extra_blacklist: Vec<String>,
}

impl Default for PropertiesConfig {
    fn default() -> Self {
        Self {
            blacklist: default_blacklist(),
            extra_blacklist: vec![],
        }
    }
}

fn default_blacklist() -> Vec<String> {
    DEFAULT_PROPERTY_BLACKLIST
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Engagement thresholds used by the session and page-view KPIs
#[derive(Debug, Deserialize, Clone)]
pub struct KpiConfig {
    /// A session longer than this many seconds is engaged
    #[serde(default = "default_engaged_session_secs")]
    pub engaged_session_secs: f64,

    /// A session with more page views than this is engaged
    #[serde(default = "default_engaged_session_pages")]
    pub engaged_session_pages: f64,

    /// A page view longer than this many seconds is engaged
    #[serde(default = "default_engaged_page_secs")]
    pub engaged_page_secs: f64,

    /// A page view scrolled past this percentage is engaged
    #[serde(default = "default_engaged_page_scroll_percent")]
    pub engaged_page_scroll_percent: f64,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            engaged_session_secs: default_engaged_session_secs(),
            engaged_session_pages: default_engaged_session_pages(),
            engaged_page_secs: default_engaged_page_secs(),
            engaged_page_scroll_percent: default_engaged_page_scroll_percent(),
        }
    }
}

fn default_engaged_session_secs() -> f64 {
    10.0
}

fn default_engaged_session_pages() -> f64 {
    2.0
}

fn default_engaged_page_secs() -> f64 {
    10.0
}

fn default_engaged_page_scroll_percent() -> f64 {
    50.0
}

/// Snapshot store backend
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per snapshot
    #[default]
    Fs,
    /// Blobs in a SQLite database
    Sqlite,
}

/// Snapshot store configuration
#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory (fs) or database file (sqlite); defaults under the data dir
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved store location for the configured backend.
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(path), _) => path.clone(),
            (None, StoreBackend::Fs) => Config::data_dir().join("snapshots"),
            (None, StoreBackend::Sqlite) => Config::database_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Effective engine settings, built once per run.
#[derive(Debug, Clone)]
pub struct InsightsSettings {
    pub top_k: i64,
    pub session_event: String,
    pub period_shift_secs: i64,
    pub report_records: usize,
    pub blacklist: HashSet<String>,
    pub kpi: KpiConfig,
}

impl InsightsSettings {
    pub fn is_blacklisted(&self, key: &str) -> bool {
        self.blacklist.contains(key)
    }

    /// Same settings with a different K.
    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }
}

impl Default for InsightsSettings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.insights.top_k == 0 || self.insights.top_k < -1 {
            return Err(Error::Config(
                "insights.top_k must be -1 or a positive number".to_string(),
            ));
        }
        if self.insights.period_shift_secs <= 0 {
            return Err(Error::Config(
                "insights.period_shift_secs must be positive".to_string(),
            ));
        }
        if self.insights.session_event.is_empty() {
            return Err(Error::Config(
                "insights.session_event must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Materialize the effective settings.
    pub fn settings(&self) -> InsightsSettings {
        let blacklist = self
            .properties
            .blacklist
            .iter()
            .chain(self.properties.extra_blacklist.iter())
            .cloned()
            .collect();
        InsightsSettings {
            top_k: self.insights.top_k,
            session_event: self.insights.session_event.clone(),
            period_shift_secs: self.insights.period_shift_secs,
            report_records: self.insights.report_records,
            blacklist,
            kpi: self.kpi.clone(),
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/deltalens/config.toml` (~/.config/deltalens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("deltalens").join("config.toml")
    }

    /// Returns the data directory path (for snapshots)
    ///
    /// `$XDG_DATA_HOME/deltalens/` (~/.local/share/deltalens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("deltalens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/deltalens/` (~/.local/state/deltalens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("deltalens")
    }

    /// Returns the SQLite snapshot database path
    ///
    /// `$XDG_DATA_HOME/deltalens/snapshots.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("snapshots.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
