use clap::ValueEnum;
use serde::Deserialize;
use std::{
    env, fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("catalog base url is empty")]
    MissingBaseUrl,
}

/// Deployment the job runs against. Each has its own config and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Environment {
    Test,
    Local,
    Preview,
    Beta,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Local => "local",
            Environment::Preview => "preview",
            Environment::Beta => "beta",
            Environment::Live => "live",
        }
    }

    pub fn config_path(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(format!("config_{}.yml", self.as_str()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub catalog: CatalogConfig,
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub images: ImageConfig,
    /// File listing barcodes cleared for the web store. Unset means every
    /// published product is eligible.
    #[serde(default)]
    pub valid_products_path: Option<PathBuf>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub crash_reports: Option<CrashReportConfig>,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    pub export_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub folder: Option<PathBuf>,
    #[serde(default)]
    pub only_with_images: bool,
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            folder: None,
            only_with_images: false,
            upload_workers: default_upload_workers(),
        }
    }
}

fn default_upload_workers() -> usize {
    4
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrashReportConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_report_timeout")]
    pub report_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            report_timeout_secs: default_report_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    2
}

fn default_read_timeout() -> u64 {
    15
}

fn default_upload_timeout() -> u64 {
    75
}

fn default_report_timeout() -> u64 {
    5
}

impl SyncConfig {
    /// Reads `config_<env>.yml` from `config_dir` and applies env overrides.
    pub fn load(environment: Environment, config_dir: &Path) -> Result<Self, ConfigError> {
        let path = environment.config_path(config_dir);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(user) = env::var("CATALOG_USER") {
            self.catalog.user = user;
        }
        if let Ok(password) = env::var("CATALOG_PASSWORD") {
            self.catalog.password = password;
        }
        if let Ok(url) = env::var("NOTIFY_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url);
        }
        if let (Some(reports), Ok(key)) = (
            self.crash_reports.as_mut(),
            env::var("CRASH_REPORT_API_KEY"),
        ) {
            reports.api_key = key;
        }
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.catalog.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if !self.catalog.base_url.ends_with('/') {
            self.catalog.base_url.push('/');
        }
        self.images.upload_workers = self.images.upload_workers.max(1);
        Ok(())
    }
}
