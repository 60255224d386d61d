use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Observations API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: ApiKey,

    #[serde(default = "default_series_id")]
    pub series_id: String,

    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Object-store archive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Local directory that plays the role of the object store; buckets are subdirectories.
    #[serde(default = "default_object_root")]
    pub root: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_file_stem")]
    pub file_stem: String,
}

/// Warehouse configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_project_id")]
    pub project_id: String,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_value_column")]
    pub value_column: String,
}

/// Retry policy applied around a whole run by the binary, never inside the pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

// ── API key ──────────────────────────────────────────────────────────────────

/// Opaque API secret. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(<redacted>)")
        }
    }
}

/// Longest trailing window a run may request.
pub const MAX_WINDOW_DAYS: i64 = 366;

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.stlouisfed.org/fred/series/observations".to_string()
}
fn default_series_id() -> String {
    "SP500".to_string()
}
fn default_window_days() -> i64 {
    7
}
fn default_limit() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "fred-etl/0.1 (daily SP500 loader)".to_string()
}
fn default_object_root() -> PathBuf {
    PathBuf::from("data/objects")
}
fn default_bucket() -> String {
    "fred-data-backup".to_string()
}
fn default_prefix() -> String {
    "daily".to_string()
}
fn default_file_stem() -> String {
    "sp500".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/warehouse.duckdb")
}
fn default_project_id() -> String {
    "fred-etl".to_string()
}
fn default_dataset() -> String {
    "fred_data".to_string()
}
fn default_table() -> String {
    "sp500_daily".to_string()
}
fn default_value_column() -> String {
    "sp500".to_string()
}
fn default_retries() -> usize {
    1
}
fn default_retry_delay_secs() -> u64 {
    300
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: ApiKey::default(),
            series_id: default_series_id(),
            window_days: default_window_days(),
            limit: default_limit(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_object_root(),
            bucket: default_bucket(),
            prefix: default_prefix(),
            file_stem: default_file_stem(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            project_id: default_project_id(),
            dataset: default_dataset(),
            table: default_table(),
            value_column: default_value_column(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FRED").separator("__"))
            .build()?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        if app_cfg.source.api_key.is_empty() {
            if let Ok(key) = std::env::var("FRED_API_KEY") {
                app_cfg.source.api_key = ApiKey::new(key);
            }
        }

        Ok(app_cfg)
    }

    /// Checks the settings a run cannot do without.
    pub fn validate_for_run(&self) -> Result<()> {
        if self.source.api_key.is_empty() {
            anyhow::bail!("Missing API key: set FRED_API_KEY or FRED__SOURCE__API_KEY");
        }
        self.validate_window()
    }

    /// Window settings only; enough to compute a window without fetching.
    pub fn validate_window(&self) -> Result<()> {
        if !(0..=MAX_WINDOW_DAYS).contains(&self.source.window_days) {
            anyhow::bail!(
                "source.window_days must be between 0 and {} (got {})",
                MAX_WINDOW_DAYS,
                self.source.window_days
            );
        }
        if self.source.limit == 0 {
            anyhow::bail!("source.limit must be at least 1");
        }
        Ok(())
    }
}
