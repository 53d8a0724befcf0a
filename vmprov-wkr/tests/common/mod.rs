//! Fixtures shared by the provisioning suites.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vmprov_common::config::CacheServiceConfig;
use vmprov_common::{JobSettings, MockCacheService, ProvisionConfig};
use vmprov_wkr::{Job, WebuiClient, Worker};

pub const WEBUI_HOST: &str = "openqa.example.com";
pub const TESTPOOL: &str = "rsync://openqa.example.com/tests";

/// A worker host on disk: share, cache and pool directories.
pub struct WorkerHost {
    pub root: TempDir,
}

impl WorkerHost {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn share(&self) -> PathBuf {
        self.root.path().join("share")
    }

    pub fn cache(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    pub fn pool(&self) -> PathBuf {
        self.root.path().join("pool/1")
    }

    /// Synced test tree inside the cache.
    pub fn cached_tests(&self) -> PathBuf {
        self.cache().join(WEBUI_HOST).join("tests")
    }

    pub fn shared_tests(&self) -> PathBuf {
        self.share().join("tests")
    }

    pub fn touch(&self, path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, b"data").expect("write");
    }

    /// `<tests>/<distri>/products/<distri>/needles`
    pub fn add_distri(&self, tests: &Path, distri: &str) {
        std::fs::create_dir_all(
            tests
                .join(distri)
                .join("products")
                .join(distri)
                .join("needles"),
        )
        .expect("mkdir");
    }

    pub fn cache_config(&self) -> ProvisionConfig {
        let mut config = ProvisionConfig::default();
        config.share_directory = self.share();
        config.cache_directory = Some(self.cache());
        config.cache_service = fast_polling();
        config
    }

    pub fn local_config(&self) -> ProvisionConfig {
        let mut config = ProvisionConfig::default();
        config.share_directory = self.share();
        config.cache_directory = None;
        config
    }

    pub fn job(
        &self,
        settings: JobSettings,
        cache: &MockCacheService,
        testpool_server: Option<&str>,
    ) -> Job {
        Job {
            id: 42,
            settings,
            worker: Worker {
                pool_dir: self.pool(),
                instance: 1,
                settings: [("WORKER_CLASS", "qemu_x86_64")].into_iter().collect(),
            },
            client: WebuiClient {
                host: WEBUI_HOST.to_string(),
                testpool_server: testpool_server.map(str::to_string),
                cache_service: Arc::new(cache.clone()),
            },
        }
    }

    pub fn vars(&self) -> serde_json::Value {
        let content = std::fs::read_to_string(self.pool().join("vars.json")).expect("vars.json");
        serde_json::from_str(&content).expect("valid json")
    }
}

pub fn fast_polling() -> CacheServiceConfig {
    CacheServiceConfig {
        poll_interval: Duration::from_millis(2),
        max_wait: Some(Duration::from_secs(10)),
        ..CacheServiceConfig::default()
    }
}

pub fn settings(value: serde_json::Value) -> JobSettings {
    serde_json::from_value(value).expect("settings")
}
