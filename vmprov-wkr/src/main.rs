//! vmprov worker agent
//!
//! Provisions a job's pool directory before the backend starts: assets are
//! fetched through the cache service (or found in the share), the test
//! tree is synced and `vars.json` is written.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use vmprov_common::{
    CacheServiceClient, JobSettings, LogConfig, ProvisionConfig, ProvisioningResult,
    asset_descriptors, init_logging, orphan_sidecars,
};
use vmprov_wkr::{
    CancellationToken, HttpCacheServiceClient, Job, JobFile, ProvisioningEngine, WebuiClient,
    Worker,
};

#[derive(Parser)]
#[command(name = "vmprov-wkr")]
#[command(author, version, about = "vmprov worker agent - job provisioning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/vmprov/worker.toml)
    #[arg(short, long, global = true, env = "VMPROV_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the pool directory for a job
    Provision {
        /// Job description: {"id": N, "settings": {...}}
        #[arg(short, long)]
        job: PathBuf,

        /// Pool directory of the worker slot
        #[arg(short, long)]
        pool_dir: PathBuf,

        /// Host of the webUI the job came from
        #[arg(long)]
        webui_host: String,

        /// Worker instance number
        #[arg(short, long, default_value = "1")]
        instance: u32,

        /// Rsync source of the test tree
        #[arg(long)]
        testpool_server: Option<String>,

        /// Worker setting, KEY=VALUE (repeatable)
        #[arg(short, long = "setting", value_parser = parse_setting)]
        settings: Vec<(String, String)>,
    },

    /// Show which settings of a job are assets
    Classify {
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Query the cache service counters
    CacheInfo,

    /// Show the effective configuration and where each value came from
    Health,
}

fn parse_setting(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{arg}'")),
    }
}

/// Console logging at the configured level, or debug with `--verbose`.
/// Without a usable config the level defaults to info.
fn log_config(config: Option<&ProvisionConfig>, verbose: bool) -> LogConfig {
    let default_level = config.map_or("info", |config| config.log_level.as_str());
    let log_config = LogConfig::from_env(default_level).with_stderr();
    if verbose {
        log_config.with_level("debug")
    } else {
        log_config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ProvisionConfig::load(cli.config.as_deref());
    let _logging_guards = init_logging(&log_config(config.as_ref().ok(), cli.verbose))?;

    match cli.command {
        Commands::Provision {
            job,
            pool_dir,
            webui_host,
            instance,
            testpool_server,
            settings,
        } => {
            let config = config?;
            let job_file = JobFile::load(&job)?;
            let result = provision(
                config,
                job_file,
                pool_dir,
                webui_host,
                instance,
                testpool_server,
                settings.into_iter().collect(),
            )
            .await;
            println!("{}", serde_json::to_string(&result)?);
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Classify { job } => {
            let job_file = JobFile::load(&job)?;
            let report = serde_json::json!({
                "assets": asset_descriptors(&job_file.settings),
                "orphans": orphan_sidecars(&job_file.settings),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CacheInfo => {
            let config = config?;
            let Some(cache_dir) = config.cache_directory.clone() else {
                bail!("No cache directory configured, the worker runs without a cache");
            };
            let client = HttpCacheServiceClient::new(&config.cache_service.url, cache_dir);
            let info = client
                .info()
                .with_context(|| format!("Cache service at {}", config.cache_service.url))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            if let Some(problem) = info.availability_error() {
                warn!("{problem}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let config = config?;
            for (key, value, source) in config.describe() {
                println!("{key:<30} {value:<40} ({source})");
            }
            println!("OK");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Provision the job. Failures are logged by the engine and returned as a
/// result for the caller to print.
async fn provision(
    config: ProvisionConfig,
    job_file: JobFile,
    pool_dir: PathBuf,
    webui_host: String,
    instance: u32,
    testpool_server: Option<String>,
    instance_settings: JobSettings,
) -> ProvisioningResult {
    let cache_dir = config
        .cache_directory
        .clone()
        .unwrap_or_else(|| config.share_directory.clone());
    let client = HttpCacheServiceClient::new(&config.cache_service.url, cache_dir);
    let job = Job {
        id: job_file.id,
        settings: job_file.settings,
        worker: Worker {
            pool_dir,
            instance,
            settings: instance_settings,
        },
        client: WebuiClient {
            host: webui_host,
            testpool_server,
            cache_service: Arc::new(client),
        },
    };

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling provisioning");
            interrupt.cancel();
        }
    });

    ProvisioningEngine::new(config)
        .provision(&job, &shutdown.child_token())
        .await
}
