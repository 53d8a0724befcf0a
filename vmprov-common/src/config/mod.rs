//! Configuration for the provisioning worker.
//!
//! - TOML file (`worker.toml`) with serde defaults
//! - `VMPROV_*` environment overrides with error collection
//! - Source tracking for diagnostics

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::{
    CacheServiceConfig, ConfigError, DEFAULT_CACHE_SERVICE_URL, DEFAULT_MAX_WAIT,
    DEFAULT_POLL_INTERVAL, DEFAULT_RSYNC_ATTEMPTS, DEFAULT_SHARE_DIRECTORY, ProvisionConfig,
    default_config_path,
};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
