//! Process-wide tracing setup for vmprov binaries.
//!
//! ```ignore
//! let log_config = LogConfig::from_env("info").with_stderr();
//! let _guards = init_logging(&log_config)?;
//! ```

use crate::config::EnvParser;
use anyhow::Context;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Additional JSON log file written through a background thread.
    pub file: Option<PathBuf>,
    /// Console output goes to stderr instead of stdout.
    pub stderr: bool,
    /// Problems found while reading the environment, reported once logging is up.
    pub warnings: Vec<String>,
}

impl LogConfig {
    /// Read `VMPROV_LOG_LEVEL`, `VMPROV_LOG_FORMAT` and `VMPROV_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let raw_format = parser.get_string("LOG_FORMAT", "pretty").value;
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);

        let mut warnings: Vec<String> = parser
            .take_errors()
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        let format = LogFormat::parse(&raw_format).unwrap_or_else(|| {
            warnings.push(format!(
                "Invalid value for VMPROV_LOG_FORMAT: expected pretty or json, got '{raw_format}'"
            ));
            LogFormat::Pretty
        });

        Self {
            level,
            format,
            file,
            stderr: false,
            warnings,
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// `RUST_LOG` wins over the configured level when set.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Keeps background log writers alive; drop on exit to flush.
#[must_use]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init_logging(config: &LogConfig) -> anyhow::Result<LoggingGuards> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console: BoxedLayer = match (config.format, config.stderr) {
        (LogFormat::Pretty, true) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        (LogFormat::Pretty, false) => tracing_subscriber::fmt::layer().with_target(false).boxed(),
        (LogFormat::Json, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Json, false) => tracing_subscriber::fmt::layer().json().boxed(),
    };
    layers.push(console);

    let mut file_guard = None;
    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let appender = tracing_appender::rolling::never(&dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.filter())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    Ok(LoggingGuards { _file: file_guard })
}
