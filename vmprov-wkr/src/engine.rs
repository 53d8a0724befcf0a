//! Provisioning of one job: assets, test tree, pool links and vars file.

use crate::asset_cache::{AssetCacheCoordinator, CachedAsset};
use crate::context::JobContext;
use crate::locate::locate_assets;
use crate::poll::PollPolicy;
use crate::symlink::link_asset;
use crate::test_sync::TestSyncCoordinator;
use crate::vars::write_vars;
use crate::workspace::{WorkspacePaths, WorkspaceResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmprov_common::util::{describe_io_error, format_settings};
use vmprov_common::{
    ErrorCode, JobSettings, ProvisionConfig, ProvisionFailure, ProvisioningResult, SettingValue,
    classify, host_dir_name, orphan_sidecars,
};

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct ProvisionedJob {
    pub settings: JobSettings,
    pub assets: Vec<CachedAsset>,
    pub workspace: WorkspacePaths,
    pub vars_file: PathBuf,
}

pub struct ProvisioningEngine {
    config: ProvisionConfig,
}

impl ProvisioningEngine {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub async fn provision(&self, job: &dyn JobContext, cancel: &CancellationToken) -> ProvisioningResult {
        match self.run(job, cancel).await {
            Ok(provisioned) => {
                info!(
                    job = job.id(),
                    vars = %provisioned.vars_file.display(),
                    "Job provisioned"
                );
                ProvisioningResult::success()
            }
            Err(failure) => {
                error!(job = job.id(), code = %failure.code, "{}", failure.message);
                for step in failure.code.entry().remediation {
                    info!(job = job.id(), code = %failure.code, "Remediation: {step}");
                }
                failure.into()
            }
        }
    }

    /// Same as [`provision`](Self::provision) but returns what was produced.
    pub async fn run(
        &self,
        job: &dyn JobContext,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedJob, ProvisionFailure> {
        let worker = job.worker();
        let client = job.client();
        let pool_dir = worker.pool_dir();
        let host = client.webui_host();

        std::fs::create_dir_all(pool_dir).map_err(|err| {
            ProvisionFailure::workspace(
                ErrorCode::PoolDirFailed,
                format!(
                    "Unable to create pool directory {}: {}",
                    pool_dir.display(),
                    describe_io_error(&err)
                ),
            )
        })?;

        let mut settings = worker.instance_settings().clone();
        settings.merge_from(job.settings());
        settings.insert("WORKER_INSTANCE", SettingValue::from(u64::from(worker.instance())));
        settings.insert("OPENQA_URL", host);
        debug!(job = job.id(), settings = %format_settings(&settings), "Merged settings");

        let assets = classify(&settings);
        for orphan in orphan_sidecars(&settings) {
            warn!(job = job.id(), setting = %orphan, "Ignoring download source without matching asset setting");
        }
        info!(job = job.id(), count = assets.len(), "Provisioning job assets");

        let (located, tests_root, project_dir) = match &self.config.cache_directory {
            Some(cache_dir) => {
                let policy = PollPolicy::from_config(&self.config.cache_service);
                let cache = client.cache_service();
                let located = AssetCacheCoordinator::new(Arc::clone(&cache), policy)
                    .cache_assets(job.id(), &settings, &assets, host, cancel)
                    .await?;

                match client.testpool_server() {
                    Some(source) => {
                        let tests = TestSyncCoordinator::new(
                            cache,
                            policy,
                            self.config.cache_service.rsync_attempts,
                        )
                        .sync_tests(job.id(), cache_dir, host, source, cancel)
                        .await?;
                        (located, tests, cache_dir.join(host_dir_name(host)))
                    }
                    None => (located, self.shared_tests_dir(), self.config.share_directory.clone()),
                }
            }
            None => (
                locate_assets(&self.config.share_directory, &settings, &assets)?,
                self.shared_tests_dir(),
                self.config.share_directory.clone(),
            ),
        };
        settings.insert("PRJDIR", project_dir.display().to_string());

        let workspace = WorkspaceResolver::new(&tests_root, pool_dir).resolve(&settings)?;
        workspace.apply(&mut settings);

        let absolute_mode = settings.is_truthy("ABSOLUTE_TEST_CONFIG_PATHS");
        for asset in &located {
            let value = if absolute_mode {
                asset.path.display().to_string()
            } else {
                link_asset(&asset.path, pool_dir)?
            };
            settings.insert(asset.setting_key.clone(), value);
        }

        let vars_file = write_vars(pool_dir, &settings)?;
        Ok(ProvisionedJob {
            settings,
            assets: located,
            workspace,
            vars_file,
        })
    }

    fn shared_tests_dir(&self) -> PathBuf {
        self.config.share_directory.join("tests")
    }
}
