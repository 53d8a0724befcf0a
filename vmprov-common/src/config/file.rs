//! Worker provisioning configuration.
//!
//! Values come from three layers: built-in defaults, an optional TOML file
//! and `VMPROV_*` environment variables, later layers winning.

use super::env::{EnvError, EnvParser, expand_home};
use super::source::ConfigSource;
use crate::errors::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SHARE_DIRECTORY: &str = "/var/lib/openqa/share";
pub const DEFAULT_CACHE_SERVICE_URL: &str = "http://127.0.0.1:9530";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_RSYNC_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment configuration: {}", join_errors(.0))]
    Env(Vec<EnvError>),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::Invalid(_) => ErrorCode::ConfigValidationError,
        }
    }
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cache service connection and polling behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheServiceConfig {
    pub url: String,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Overall wait per request; `0s` in the file disables the deadline.
    #[serde(with = "optional_duration_str")]
    pub max_wait: Option<Duration>,
    pub rsync_attempts: u32,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CACHE_SERVICE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: Some(DEFAULT_MAX_WAIT),
            rsync_attempts: DEFAULT_RSYNC_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub share_directory: PathBuf,
    /// When unset, assets are looked up in the share directory instead of
    /// being fetched through the cache service.
    pub cache_directory: Option<PathBuf>,
    pub cache_service: CacheServiceConfig,
    pub log_level: String,
    #[serde(skip)]
    sources: BTreeMap<String, ConfigSource>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            share_directory: PathBuf::from(DEFAULT_SHARE_DIRECTORY),
            cache_directory: None,
            cache_service: CacheServiceConfig::default(),
            log_level: "info".to_string(),
            sources: BTreeMap::new(),
        }
    }
}

/// `<config_dir>/vmprov/worker.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("vmprov").join("worker.toml"))
}

const FILE_KEYS: &[&str] = &[
    "share_directory",
    "cache_directory",
    "cache_service.url",
    "cache_service.poll_interval",
    "cache_service.max_wait",
    "cache_service.rsync_attempts",
    "log_level",
];

impl ProvisionConfig {
    /// Load from `explicit` (must exist) or the default location (optional),
    /// then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let table: toml::Table = toml::from_str(&content).unwrap_or_default();
        for key in FILE_KEYS {
            if toml_has_key(&table, key) {
                config
                    .sources
                    .insert((*key).to_string(), ConfigSource::File(path.to_path_buf()));
            }
        }
        debug!(path = %path.display(), "Loaded worker configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overlay `VMPROV_*` variables. Errors are collected in `parser`.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        let share = parser.get_optional_string("SHARE_DIRECTORY");
        if let Some(value) = share.value {
            self.share_directory = expand_home(&value);
            self.mark_env("share_directory");
        }

        // Set but empty disables the cache.
        let cache = parser.get_optional_string("CACHE_DIRECTORY");
        if !cache.is_default() {
            self.cache_directory = cache.value.map(|v| expand_home(&v));
            self.mark_env("cache_directory");
        }

        let url = parser.get_optional_string("CACHE_SERVICE_URL");
        if let Some(value) = url.value {
            self.cache_service.url = value;
            self.mark_env("cache_service.url");
        }

        let interval = parser.get_duration("POLL_INTERVAL", self.cache_service.poll_interval);
        if !interval.is_default() {
            self.cache_service.poll_interval = interval.value;
            self.mark_env("cache_service.poll_interval");
        }

        let max_wait = parser.get_duration(
            "MAX_WAIT",
            self.cache_service.max_wait.unwrap_or(Duration::ZERO),
        );
        if !max_wait.is_default() {
            self.cache_service.max_wait = Some(max_wait.value).filter(|d| !d.is_zero());
            self.mark_env("cache_service.max_wait");
        }

        let attempts =
            parser.get_u32_range("RSYNC_ATTEMPTS", self.cache_service.rsync_attempts, 1, 100);
        if !attempts.is_default() {
            self.cache_service.rsync_attempts = attempts.value;
            self.mark_env("cache_service.rsync_attempts");
        }

        let level = parser.get_log_level("LOG_LEVEL", &self.log_level);
        if !level.is_default() {
            self.log_level = level.value;
            self.mark_env("log_level");
        }
    }

    fn mark_env(&mut self, key: &str) {
        self.sources
            .insert(key.to_string(), ConfigSource::Environment);
    }

    /// Where `key` (dotted, as in the file) was set from.
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::Default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.cache_service.poll_interval.is_zero() {
            problems.push("cache_service.poll_interval must be greater than zero".to_string());
        }
        if self.cache_service.rsync_attempts == 0 {
            problems.push("cache_service.rsync_attempts must be at least 1".to_string());
        }
        if self.cache_directory.is_some() && self.cache_service.url.trim().is_empty() {
            problems.push("cache_service.url is required when cache_directory is set".to_string());
        }
        if self.share_directory.as_os_str().is_empty() {
            problems.push("share_directory must not be empty".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Effective settings with their sources, for `health` output.
    pub fn describe(&self) -> Vec<(&'static str, String, ConfigSource)> {
        let max_wait = self
            .cache_service
            .max_wait
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_else(|| "none".to_string());
        let cache_dir = self
            .cache_directory
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(disabled)".to_string());
        vec![
            (
                "share_directory",
                self.share_directory.display().to_string(),
                self.source_of("share_directory"),
            ),
            ("cache_directory", cache_dir, self.source_of("cache_directory")),
            (
                "cache_service.url",
                self.cache_service.url.clone(),
                self.source_of("cache_service.url"),
            ),
            (
                "cache_service.poll_interval",
                humantime::format_duration(self.cache_service.poll_interval).to_string(),
                self.source_of("cache_service.poll_interval"),
            ),
            ("cache_service.max_wait", max_wait, self.source_of("cache_service.max_wait")),
            (
                "cache_service.rsync_attempts",
                self.cache_service.rsync_attempts.to_string(),
                self.source_of("cache_service.rsync_attempts"),
            ),
            ("log_level", self.log_level.clone(), self.source_of("log_level")),
        ]
    }
}

fn toml_has_key(table: &toml::Table, dotted: &str) -> bool {
    match dotted.split_once('.') {
        Some((head, rest)) => table
            .get(head)
            .and_then(toml::Value::as_table)
            .is_some_and(|inner| toml_has_key(inner, rest)),
        None => table.contains_key(dotted),
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        let d = value.unwrap_or(Duration::ZERO);
        s.serialize_str(&humantime::format_duration(d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = String::deserialize(d)?;
        let parsed = humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)?;
        Ok(Some(parsed).filter(|d| !d.is_zero()))
    }
}
