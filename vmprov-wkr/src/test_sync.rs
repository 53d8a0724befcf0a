//! Synchronizing the test tree into the cache directory.

use crate::poll::{PollError, PollPolicy, call_client, wait_until_processed};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vmprov_common::{
    CacheServiceClient, CacheStatus, ErrorCode, ProvisionFailure, host_dir_name,
};

pub struct TestSyncCoordinator {
    client: Arc<dyn CacheServiceClient>,
    policy: PollPolicy,
    attempts: u32,
}

impl TestSyncCoordinator {
    pub fn new(client: Arc<dyn CacheServiceClient>, policy: PollPolicy, attempts: u32) -> Self {
        Self {
            client,
            policy,
            attempts: attempts.max(1),
        }
    }

    /// Rsync `rsync_source` into `<cache_dir>/<host>` and return the
    /// `tests` directory below it.
    pub async fn sync_tests(
        &self,
        job_id: u64,
        cache_dir: &Path,
        webui_host: &str,
        rsync_source: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ProvisionFailure> {
        let target = cache_dir.join(host_dir_name(webui_host));
        let request = self.client.rsync_request(rsync_source, &target);
        let mut last_result = String::new();

        for attempt in 1..=self.attempts {
            let submitted = request.clone();
            let id = call_client(&self.client, cancel, move |client| client.enqueue(&submitted))
                .await
                .map_err(|err| match err {
                    PollError::Status(err) => ProvisionFailure::infrastructure(
                        ErrorCode::RsyncRequestRejected,
                        format!(
                            "Failed to send rsync from '{rsync_source}' to '{}': {err}",
                            target.display()
                        ),
                    ),
                    other => rsync_failure(other, job_id),
                })?;
            info!(
                request = %id,
                attempt,
                "Rsync from '{rsync_source}' to '{}' requested",
                target.display()
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
                    ErrorCode::RsyncFailed,
                    format!("Failed to rsync tests: {err}"),
                ),
                other => rsync_failure(other, job_id),
            })?;

            if let Some(output) = status.output.as_deref().filter(|o| !o.is_empty()) {
                info!("Output of rsync:\n{output}");
            }
            if succeeded(&status) {
                info!("Finished to rsync tests");
                return Ok(target.join("tests"));
            }

            last_result = describe_result(&status);
            if attempt < self.attempts {
                warn!(
                    attempt,
                    attempts = self.attempts,
                    "Rsync of tests failed with {last_result}, retrying"
                );
            }
        }

        Err(ProvisionFailure::infrastructure(
            ErrorCode::RsyncFailed,
            format!("Failed to rsync tests: {last_result}"),
        ))
    }
}

fn rsync_failure(err: PollError, job_id: u64) -> ProvisionFailure {
    err.lifecycle_failure(job_id).unwrap_or_else(|| {
        ProvisionFailure::infrastructure(ErrorCode::RsyncFailed, "Failed to rsync tests")
    })
}

fn succeeded(status: &CacheStatus) -> bool {
    !status.has_error() && status.exit_code() == Some(0)
}

fn describe_result(status: &CacheStatus) -> String {
    status
        .error
        .clone()
        .filter(|e| !e.is_empty())
        .or_else(|| status.result_text())
        .unwrap_or_else(|| "no result".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vmprov_common::MockCacheService;

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: None,
        }
    }

    #[tokio::test]
    async fn test_sync_returns_tests_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).pending_polls(1).build();
        let tests = TestSyncCoordinator::new(Arc::new(mock.clone()), policy(), 3)
            .sync_tests(
                1,
                dir.path(),
                "openqa.example.com",
                "rsync://openqa.example.com/tests",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(tests, dir.path().join("openqa.example.com/tests"));
        assert!(tests.is_dir());
        assert_eq!(mock.rsync_request_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .rsync_enqueue_error("Connection refused")
            .build();
        let err = TestSyncCoordinator::new(Arc::new(mock.clone()), policy(), 3)
            .sync_tests(1, dir.path(), "webui", "webui:/tests", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.message,
            format!(
                "Failed to send rsync from 'webui:/tests' to '{}': Connection refused",
                dir.path().join("webui").display()
            )
        );
        assert!(err.category.is_none());
        assert_eq!(mock.rsync_request_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .rsync_results(["exit code 23", "exit code 0"])
            .build();
        let tests = TestSyncCoordinator::new(Arc::new(mock.clone()), policy(), 3)
            .sync_tests(1, dir.path(), "webui", "webui:/tests", &CancellationToken::new())
            .await
            .unwrap();
        assert!(tests.is_dir());
        assert_eq!(mock.rsync_request_count(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .rsync_results(["exit code 10", "exit code 23"])
            .build();
        let err = TestSyncCoordinator::new(Arc::new(mock.clone()), policy(), 3)
            .sync_tests(1, dir.path(), "webui", "webui:/tests", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "Failed to rsync tests: exit code 23");
        assert_eq!(err.code, ErrorCode::RsyncFailed);
        assert!(err.category.is_none());
        assert_eq!(mock.rsync_request_count(), 3);
    }
}
