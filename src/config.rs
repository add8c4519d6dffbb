use crate::api::resource::Resource;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const BASE_URL_ENV: &str = "MAILDECK_API_BASE";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,
    pub poll: PollConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Polling intervals; `None` means the view does not poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub logs: Option<Duration>,
    pub escalations: Option<Duration>,
    pub history: Option<Duration>,
    pub status: Option<Duration>,
}

impl PollConfig {
    pub fn for_resource(&self, resource: Resource) -> Option<Duration> {
        match resource {
            Resource::Logs => self.logs,
            Resource::Escalations => self.escalations,
            Resource::History => self.history,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiConfig {
    pub page_size: u32,
    pub export_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    backend: RawBackendConfig,
    #[serde(default)]
    poll: RawPollConfig,
    #[serde(default)]
    ui: RawUiConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackendConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

impl Default for RawBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPollConfig {
    #[serde(default = "default_logs_secs")]
    logs_secs: u64,
    #[serde(default = "default_slow_secs")]
    escalations_secs: u64,
    #[serde(default = "default_slow_secs")]
    history_secs: u64,
    #[serde(default = "default_status_secs")]
    status_secs: u64,
}

impl Default for RawPollConfig {
    fn default() -> Self {
        Self {
            logs_secs: default_logs_secs(),
            escalations_secs: default_slow_secs(),
            history_secs: default_slow_secs(),
            status_secs: default_status_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_export_dir")]
    export_dir: PathBuf,
}

impl Default for RawUiConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_logs_secs() -> u64 {
    10
}

fn default_slow_secs() -> u64 {
    30
}

fn default_status_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    10
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

fn interval(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("maildeck").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("maildeck")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig {
                base_url: default_base_url(),
                timeout: Duration::from_millis(default_timeout_ms()),
            },
            poll: PollConfig {
                logs: interval(default_logs_secs()),
                escalations: interval(default_slow_secs()),
                history: interval(default_slow_secs()),
                status: interval(default_status_secs()),
            },
            ui: UiConfig {
                page_size: default_page_size(),
                export_dir: default_export_dir(),
            },
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults; a present but
    /// malformed one is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.backend.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "backend.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if raw.ui.page_size == 0 {
            return Err(ConfigError::Invalid(
                "ui.page_size must be greater than 0".to_string(),
            ));
        }

        let mut config = Config {
            backend: BackendConfig {
                base_url: String::new(),
                timeout: Duration::from_millis(raw.backend.timeout_ms),
            },
            poll: PollConfig {
                logs: interval(raw.poll.logs_secs),
                escalations: interval(raw.poll.escalations_secs),
                history: interval(raw.poll.history_secs),
                status: interval(raw.poll.status_secs),
            },
            ui: UiConfig {
                page_size: raw.ui.page_size,
                export_dir: raw.ui.export_dir,
            },
        };
        config.set_base_url(&raw.backend.base_url)?;
        Ok(config)
    }

    /// Replace the backend URL, keeping the same validation as the file.
    pub fn set_base_url(&mut self, url: &str) -> Result<(), ConfigError> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "backend.base_url must start with http:// or https://, got '{}'",
                url
            )));
        }
        self.backend.base_url = url.trim_end_matches('/').to_string();
        Ok(())
    }

    /// Apply `MAILDECK_API_BASE` when it is set and non-empty.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        match std::env::var(BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.set_base_url(&url),
            _ => Ok(()),
        }
    }
}
