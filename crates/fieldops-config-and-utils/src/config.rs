//! Settings file plus `FIELDOPS_*` environment overrides.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Sync backend baked in at build time via `FIELDOPS_SYNC_URL`, if set.
pub const DEFAULT_SYNC_URL: &str = match option_env!("FIELDOPS_SYNC_URL") {
    Some(url) => url,
    None => "https://api.fieldops.example",
};

pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVEL_ENV: &str = "FIELDOPS_LOG_LEVEL";
const SYNC_URL_ENV: &str = "FIELDOPS_SYNC_URL";

/// Contents of `config.json`. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// tracing level name; `RUST_LOG` still wins.
    pub log_level: String,
    /// Base URL of the sync backend.
    pub sync_url: String,
    /// Seconds between periodic flush passes.
    pub flush_interval_secs: u64,
    /// Per-request timeout for the sync endpoint.
    pub request_timeout_secs: u64,
    /// Failed attempts before an event is dead-lettered.
    pub max_retries: u32,
    /// Pending events accepted before enqueue is refused.
    pub max_pending: usize,
    /// Optional wall-clock budget for one flush pass.
    pub pass_deadline_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            sync_url: DEFAULT_SYNC_URL.to_string(),
            flush_interval_secs: 30,
            request_timeout_secs: 30,
            max_retries: 5,
            max_pending: 10_000,
            pass_deadline_secs: None,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from `<base_dir>/config.json`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Write `<base_dir>/config.json`, creating the directory first.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(log_level) = lookup(LOG_LEVEL_ENV) {
            self.log_level = log_level;
        }
        if let Some(sync_url) = lookup(SYNC_URL_ENV) {
            self.sync_url = sync_url;
        }
    }

    /// `sync_url`, parsed. Only http and https schemes are accepted.
    pub fn sync_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.sync_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CoreError::Config(format!(
                "sync_url must be http or https, got {}",
                other
            ))),
        }
    }
}
