//! Provenance tracking for configuration values.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    File(PathBuf),
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Environment => write!(f, "environment"),
            Self::CommandLine => write!(f, "command line"),
        }
    }
}

/// A value together with its source and, for environment values, the
/// variable that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    pub fn from_file(value: T, path: impl Into<PathBuf>) -> Self {
        Self {
            value,
            source: ConfigSource::File(path.into()),
            var: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
