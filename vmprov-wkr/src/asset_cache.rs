//! Fetching job assets through the cache service.

use crate::poll::{PollError, PollPolicy, call_client, wait_until_processed};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vmprov_common::asset::download_source;
use vmprov_common::{AssetKind, CacheServiceClient, ErrorCode, JobSettings, ProvisionFailure};

/// An asset available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub setting_key: String,
    /// Value of the setting before provisioning rewrote it.
    pub asset: String,
    pub path: PathBuf,
}

pub struct AssetCacheCoordinator {
    client: Arc<dyn CacheServiceClient>,
    policy: PollPolicy,
}

impl AssetCacheCoordinator {
    pub fn new(client: Arc<dyn CacheServiceClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Check that the service is up and has workers to process requests.
    async fn check_available(
        &self,
        job_id: u64,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionFailure> {
        let info = call_client(&self.client, cancel, |client| client.info())
            .await
            .map_err(|err| match err {
                PollError::Status(err) => ProvisionFailure::infrastructure(
                    ErrorCode::CacheServiceUnreachable,
                    format!("Cache service not reachable: {err}"),
                ),
                other => lifecycle_or(other, job_id, "Cache service not reachable"),
            })?;
        match info.availability_error() {
            Some(message) => Err(ProvisionFailure::infrastructure(
                ErrorCode::CacheServiceNoWorkers,
                message,
            )),
            None => Ok(()),
        }
    }

    /// Cache every asset in key order, stopping at the first failure.
    pub async fn cache_assets(
        &self,
        job_id: u64,
        settings: &JobSettings,
        assets: &BTreeMap<String, AssetKind>,
        webui_host: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CachedAsset>, ProvisionFailure> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }
        self.check_available(job_id, cancel).await?;

        let mut cached = Vec::with_capacity(assets.len());
        for (key, kind) in assets {
            let Some(value) = settings.get_str(key) else {
                continue;
            };
            let path = self
                .cache_one(job_id, settings, key, *kind, &value, webui_host, cancel)
                .await?;
            cached.push(CachedAsset {
                setting_key: key.clone(),
                asset: value,
                path,
            });
        }
        Ok(cached)
    }

    #[allow(clippy::too_many_arguments)]
    async fn cache_one(
        &self,
        job_id: u64,
        settings: &JobSettings,
        key: &str,
        kind: AssetKind,
        value: &str,
        webui_host: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ProvisionFailure> {
        let (url, decompress) = match download_source(settings, key) {
            Some((url, decompress)) => (Some(url), decompress),
            None => (None, false),
        };
        let request = self
            .client
            .asset_request(job_id, value, kind, webui_host, url, decompress);

        let submitted = request.clone();
        let id = call_client(&self.client, cancel, move |client| client.enqueue(&submitted))
            .await
            .map_err(|err| match err {
                PollError::Status(err) => ProvisionFailure::infrastructure(
                    ErrorCode::AssetRequestRejected,
                    format!("Failed to send asset request for {value}: {err}"),
                ),
                other => lifecycle_or(
                    other,
                    job_id,
                    &format!("Failed to send asset request for {value}"),
                ),
            })?;
        info!(
            setting = %key,
            request = %id,
            "Downloading {value}, request sent to cache service"
        );

        let status = wait_until_processed(
            &self.client,
            &id,
            &request.describe(),
            self.policy,
            cancel,
        )
        .await
        .map_err(|err| match err {
            PollError::Status(err) => ProvisionFailure::infrastructure(
                ErrorCode::CacheRequestFailed,
                format!("Failed to download {value}: {err}"),
            ),
            other => lifecycle_or(other, job_id, &format!("Failed to download {value}")),
        })?;

        if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(ProvisionFailure::infrastructure(
                ErrorCode::CacheRequestFailed,
                format!("Failed to download {value}: {error}"),
            ));
        }
        if let Some(output) = status.output.as_deref().filter(|o| !o.is_empty()) {
            info!("Output of download of {value}:\n{output}");
        }

        let asset_path = self.client.asset_path(webui_host, value);
        if !self.client.asset_exists(webui_host, value) {
            return Err(ProvisionFailure::asset(
                ErrorCode::AssetDownloadFailed,
                format!("Failed to download {value} to {}", asset_path.display()),
            ));
        }
        debug!(setting = %key, path = %asset_path.display(), "Asset cached");
        Ok(asset_path)
    }
}

fn lifecycle_or(err: PollError, job_id: u64, message: &str) -> ProvisionFailure {
    err.lifecycle_failure(job_id).unwrap_or_else(|| {
        ProvisionFailure::infrastructure(ErrorCode::CacheRequestFailed, message.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vmprov_common::{
        CacheRequest, CacheServiceInfo, ErrorCategory, MockAssetOutcome, MockCacheService,
        classify,
    };

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Some(Duration::from_secs(5)),
        }
    }

    fn job_settings(pairs: &[(&str, &str)]) -> JobSettings {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[tokio::test]
    async fn test_no_assets_skips_service() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).unreachable("down").build();
        let coordinator = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy());
        let cached = coordinator
            .cache_assets(1, &JobSettings::new(), &BTreeMap::new(), "webui", &CancellationToken::new())
            .await
            .unwrap();
        assert!(cached.is_empty());
        assert_eq!(mock.info_calls(), 0);
    }

    #[tokio::test]
    async fn test_caches_assets_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).pending_polls(2).build();
        let settings = job_settings(&[
            ("ISO", "foo.iso"),
            ("HDD_1", "disk.qcow2"),
            ("HDD_1_DECOMPRESS_URL", "https://example.com/disk.qcow2.xz"),
            ("KERNEL", "vmlinuz"),
        ]);
        let coordinator = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy());
        let cached = coordinator
            .cache_assets(9, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(mock.requested_assets(), ["disk.qcow2", "foo.iso", "vmlinuz"]);
        assert_eq!(cached.len(), 3);
        assert_eq!(cached[1].path, dir.path().join("webui/foo.iso"));

        let CacheRequest::Asset(hdd) = &mock.requests()[0] else {
            panic!("expected asset request");
        };
        assert_eq!(hdd.url.as_deref(), Some("https://example.com/disk.qcow2.xz"));
        assert!(hdd.decompress);
        assert_eq!(hdd.job_id, 9);
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_before_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .unreachable("Connection refused")
            .build();
        let settings = job_settings(&[("ISO", "foo.iso")]);
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(1, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "Cache service not reachable: Connection refused");
        assert!(err.category.is_none());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_active_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .info(CacheServiceInfo::default())
            .build();
        let settings = job_settings(&[("ISO", "foo.iso")]);
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(1, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "No workers active in the cache service");
        assert_eq!(err.code, ErrorCode::CacheServiceNoWorkers);
    }

    #[tokio::test]
    async fn test_enqueue_error() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .enqueue_error("foo.iso", "Too many requests")
            .build();
        let settings = job_settings(&[("ISO", "foo.iso")]);
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(1, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.message,
            "Failed to send asset request for foo.iso: Too many requests"
        );
        assert!(err.category.is_none());
    }

    #[tokio::test]
    async fn test_not_found_is_asset_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .asset("foo.iso", MockAssetOutcome::NotFound)
            .build();
        let settings = job_settings(&[("ISO", "foo.iso"), ("KERNEL", "vmlinuz")]);
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(1, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.message,
            format!(
                "Failed to download foo.iso to {}",
                dir.path().join("webui/foo.iso").display()
            )
        );
        assert_eq!(err.category, Some(ErrorCategory::AssetFailure));
        // Later assets are not requested once one fails.
        assert_eq!(mock.requested_assets(), ["foo.iso"]);
    }

    #[tokio::test]
    async fn test_service_error_while_processing() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .asset("foo.iso", MockAssetOutcome::Error("disk full".to_string()))
            .build();
        let settings = job_settings(&[("ISO", "foo.iso")]);
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(1, &settings, &classify(&settings), "webui", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "Failed to download foo.iso: disk full");
        assert!(err.category.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).build();
        let settings = job_settings(&[("ISO", "foo.iso")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = AssetCacheCoordinator::new(Arc::new(mock.clone()), policy())
            .cache_assets(5, &settings, &classify(&settings), "webui", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(err.message, "Provisioning of job 5 was cancelled");
        assert_eq!(mock.info_calls(), 0);
        assert!(mock.requests().is_empty());
    }
}
