use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "adtrack.db";
const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(15 * 60);

/// Runtime configuration for a [`Manager`](crate::manager::Manager).
/// `test_mode` is fixed here, before `start`, matching the source SDK
/// contract that toggling it after startup has no effect.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub api_key: String,
    pub api_secret: String,
    pub test_mode: bool,
    pub data_dir: PathBuf,
    pub queue_capacity: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub delivery_log: Option<PathBuf>,
}

impl ManagerConfig {
    pub fn new(api_key: &str, api_secret: &str, data_dir: &Path) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            test_mode: false,
            data_dir: data_dir.to_path_buf(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_base: DEFAULT_RETRY_BASE,
            retry_max: DEFAULT_RETRY_MAX,
            delivery_log: None,
        }
    }

    pub fn with_test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry_bounds(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    pub fn with_delivery_log(mut self, path: &Path) -> Self {
        self.delivery_log = Some(path.to_path_buf());
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}

/// Credentials and flags loaded from an on-disk TOML file, for embeddings
/// that prefer file-based configuration over hardcoded credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfig {
    pub api_key: String,
    pub api_secret: String,
    pub test_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFileConfig {
    version: Option<u32>,
    credentials: Option<RawCredentials>,
    tracking: Option<RawTracking>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCredentials {
    api_key: Option<String>,
    api_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTracking {
    test_mode: Option<bool>,
}

pub fn load_config_file(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let parsed: RawFileConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(validate_file_config(parsed, path)?))
}

fn validate_file_config(raw: RawFileConfig, path: &Path) -> Result<FileConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != 1 {
        bail!(
            "{} has unsupported version {version}; expected version = 1",
            path.display()
        );
    }

    let credentials = raw
        .credentials
        .ok_or_else(|| anyhow::anyhow!("{} missing `[credentials]`", path.display()))?;
    let api_key = sanitize_required(credentials.api_key)
        .ok_or_else(|| anyhow::anyhow!("{} missing `[credentials].api_key`", path.display()))?;
    let api_secret = sanitize_required(credentials.api_secret)
        .ok_or_else(|| anyhow::anyhow!("{} missing `[credentials].api_secret`", path.display()))?;

    Ok(FileConfig {
        api_key,
        api_secret,
        test_mode: raw.tracking.and_then(|t| t.test_mode).unwrap_or(false),
    })
}

fn sanitize_required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
