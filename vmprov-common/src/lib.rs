//! Shared types for vmprov.
//!
//! Job settings and the asset-key grammar, the cache-service contract with a
//! scripted in-process implementation, the error catalog, configuration and
//! logging used by the provisioning worker.

pub mod asset;
pub mod cache_service;
pub mod config;
pub mod errors;
pub mod logging;
pub mod mock_cache_service;
pub mod settings;
pub mod testing;
pub mod util;

pub use asset::{
    AssetDescriptor, AssetKind, SettingKey, Sidecar, asset_descriptors, classify, orphan_sidecars,
};
pub use cache_service::{
    AssetRequest, CacheRequest, CacheServiceClient, CacheServiceError, CacheServiceInfo,
    CacheStatus, RequestId, RequestState, RsyncRequest, host_dir_name,
};
pub use config::{ConfigError, ConfigSource, EnvParser, ProvisionConfig};
pub use errors::{
    ErrorCategory, ErrorCode, ErrorEntry, ErrorSubsystem, ProvisionFailure, ProvisioningResult,
};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use mock_cache_service::{MockAssetOutcome, MockCacheService, MockCacheServiceBuilder};
pub use settings::{JobSettings, SettingValue};
