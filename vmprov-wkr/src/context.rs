//! What the provisioning engine needs to know about the job, the worker
//! slot and the webUI it serves.
//!
//! Coordinators take these narrow traits so tests can provide their own.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmprov_common::{CacheServiceClient, JobSettings};

pub trait WorkerContext: Send + Sync {
    /// Per-job pool directory the engine writes into.
    fn pool_dir(&self) -> &Path;
    fn instance(&self) -> u32;
    /// Worker-level settings, overridden by the job's own.
    fn instance_settings(&self) -> &JobSettings;
}

pub trait ClientContext: Send + Sync {
    fn webui_host(&self) -> &str;
    /// Rsync source of the test tree, when the webUI offers one.
    fn testpool_server(&self) -> Option<&str>;
    fn cache_service(&self) -> Arc<dyn CacheServiceClient>;
}

pub trait JobContext: Send + Sync {
    fn id(&self) -> u64;
    fn settings(&self) -> &JobSettings;
    fn worker(&self) -> &dyn WorkerContext;
    fn client(&self) -> &dyn ClientContext;
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub pool_dir: PathBuf,
    pub instance: u32,
    pub settings: JobSettings,
}

impl WorkerContext for Worker {
    fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    fn instance(&self) -> u32 {
        self.instance
    }

    fn instance_settings(&self) -> &JobSettings {
        &self.settings
    }
}

#[derive(Clone)]
pub struct WebuiClient {
    pub host: String,
    pub testpool_server: Option<String>,
    pub cache_service: Arc<dyn CacheServiceClient>,
}

impl ClientContext for WebuiClient {
    fn webui_host(&self) -> &str {
        &self.host
    }

    fn testpool_server(&self) -> Option<&str> {
        self.testpool_server.as_deref()
    }

    fn cache_service(&self) -> Arc<dyn CacheServiceClient> {
        Arc::clone(&self.cache_service)
    }
}

pub struct Job {
    pub id: u64,
    pub settings: JobSettings,
    pub worker: Worker,
    pub client: WebuiClient,
}

impl JobContext for Job {
    fn id(&self) -> u64 {
        self.id
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn worker(&self) -> &dyn WorkerContext {
        &self.worker
    }

    fn client(&self) -> &dyn ClientContext {
        &self.client
    }
}

/// Job description as stored on disk: `{"id": 42, "settings": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    pub id: u64,
    #[serde(default)]
    pub settings: JobSettings,
}

impl JobFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job file {}", path.display()))
    }
}
