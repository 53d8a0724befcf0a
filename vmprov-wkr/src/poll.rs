//! Waiting for a cache-service request to be processed.
//!
//! Each request moves `Submitted -> Pending -> Processed`. The status is
//! queried once per interval until it reports processed, the optional
//! deadline passes, or the job is cancelled. Client calls block, so they run
//! on the blocking pool and are raced against cancellation and the deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vmprov_common::config::CacheServiceConfig;
use vmprov_common::{
    CacheServiceClient, CacheServiceError, CacheStatus, ErrorCode, ProvisionFailure, RequestId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Submitted,
    Pending,
    Processed,
}

impl RequestPhase {
    /// Phase after observing `status`.
    pub fn observe(self, status: &CacheStatus) -> Self {
        if status.is_processed() {
            Self::Processed
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl PollPolicy {
    pub fn from_config(config: &CacheServiceConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_wait: config.max_wait,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("{0}")]
    Status(CacheServiceError),
    #[error("timed out after {} waiting for {what}", humantime::format_duration(*.waited))]
    TimedOut { waited: Duration, what: String },
    #[error("cancelled")]
    Cancelled,
}

impl PollError {
    /// Failure for timeouts and cancellation. Status errors are worded by
    /// the caller, which knows what was requested.
    pub fn lifecycle_failure(&self, job_id: u64) -> Option<ProvisionFailure> {
        match self {
            Self::Status(_) => None,
            Self::TimedOut { waited, what } => Some(ProvisionFailure::infrastructure(
                ErrorCode::PollTimeout,
                format!(
                    "Timed out after {} waiting for {what}",
                    humantime::format_duration(*waited)
                ),
            )),
            Self::Cancelled => Some(ProvisionFailure::infrastructure(
                ErrorCode::Cancelled,
                format!("Provisioning of job {job_id} was cancelled"),
            )),
        }
    }
}

/// Run one client call on the blocking pool, giving up as soon as `cancel`
/// fires. An abandoned call finishes in the background.
pub async fn call_client<T, F>(
    client: &Arc<dyn CacheServiceClient>,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, PollError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CacheServiceClient) -> Result<T, CacheServiceError> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(PollError::Cancelled);
    }
    let client = Arc::clone(client);
    let task = tokio::task::spawn_blocking(move || call(client.as_ref()));
    tokio::select! {
        joined = task => match joined {
            Ok(result) => result.map_err(PollError::Status),
            Err(err) => Err(PollError::Status(CacheServiceError::Unreachable(format!(
                "cache service call aborted: {err}"
            )))),
        },
        _ = cancel.cancelled() => Err(PollError::Cancelled),
    }
}

/// `deadline` is the instant to give up at and the overall wait it stands for.
async fn until_deadline<T>(
    deadline: Option<(Instant, Duration)>,
    what: &str,
    fut: impl Future<Output = Result<T, PollError>>,
) -> Result<T, PollError> {
    let Some((deadline, waited)) = deadline else {
        return fut.await;
    };
    tokio::select! {
        result = fut => result,
        _ = tokio::time::sleep_until(deadline) => Err(PollError::TimedOut {
            waited,
            what: what.to_string(),
        }),
    }
}

/// Poll `id` until processed.
pub async fn wait_until_processed(
    client: &Arc<dyn CacheServiceClient>,
    id: &RequestId,
    what: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<CacheStatus, PollError> {
    let started = Instant::now();
    let deadline = policy.max_wait.map(|max_wait| (started + max_wait, max_wait));
    let mut phase = RequestPhase::Submitted;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let request = id.clone();
        let status = until_deadline(
            deadline,
            what,
            call_client(client, cancel, move |client| client.status(&request)),
        )
        .await?;

        let next = phase.observe(&status);
        if next != phase {
            debug!(request = %id, from = ?phase, to = ?next, "Request phase changed");
            phase = next;
        }
        if phase == RequestPhase::Processed {
            debug!(request = %id, elapsed = ?started.elapsed(), "Request processed");
            return Ok(status);
        }
        debug!(request = %id, status = ?status.status, "Waiting for {what}");

        let mut sleep_for = policy.interval;
        if let Some(max_wait) = policy.max_wait {
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                return Err(PollError::TimedOut {
                    waited: max_wait,
                    what: what.to_string(),
                });
            }
            sleep_for = sleep_for.min(max_wait - elapsed);
        }

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use vmprov_common::{
        AssetKind, CacheRequest, CacheServiceInfo, MockCacheService, RequestState,
    };

    fn policy(interval_ms: u64, max_wait_ms: Option<u64>) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(interval_ms),
            max_wait: max_wait_ms.map(Duration::from_millis),
        }
    }

    fn enqueued(mock: &MockCacheService) -> (Arc<dyn CacheServiceClient>, RequestId) {
        let request = mock.asset_request(1, "a.iso", AssetKind::Iso, "webui", None, false);
        let id = mock.enqueue(&request).unwrap();
        (Arc::new(mock.clone()), id)
    }

    /// A service whose status endpoint hangs.
    struct StalledService {
        stall: Duration,
        cache_dir: PathBuf,
    }

    impl CacheServiceClient for StalledService {
        fn info(&self) -> Result<CacheServiceInfo, CacheServiceError> {
            Ok(CacheServiceInfo::default())
        }

        fn enqueue(&self, _request: &CacheRequest) -> Result<RequestId, CacheServiceError> {
            Ok(RequestId::new("stalled"))
        }

        fn status(&self, _id: &RequestId) -> Result<CacheStatus, CacheServiceError> {
            std::thread::sleep(self.stall);
            Ok(CacheStatus::pending())
        }

        fn cache_directory(&self) -> &Path {
            &self.cache_dir
        }
    }

    fn stalled(stall: Duration) -> Arc<dyn CacheServiceClient> {
        Arc::new(StalledService {
            stall,
            cache_dir: PathBuf::from("/tmp"),
        })
    }

    #[test]
    fn test_phase_transitions() {
        let mut processed = CacheStatus::pending();
        assert_eq!(
            RequestPhase::Submitted.observe(&processed),
            RequestPhase::Pending
        );
        processed.status = RequestState::Processed;
        assert_eq!(
            RequestPhase::Pending.observe(&processed),
            RequestPhase::Processed
        );
    }

    #[tokio::test]
    async fn test_polls_until_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).pending_polls(3).build();
        let (client, id) = enqueued(&mock);

        let status = wait_until_processed(
            &client,
            &id,
            "a.iso",
            policy(1, None),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(status.is_processed());
        assert_eq!(mock.status_calls(), 4);
    }

    #[tokio::test]
    async fn test_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .pending_polls(u32::MAX)
            .build();
        let (client, id) = enqueued(&mock);

        let err = wait_until_processed(
            &client,
            &id,
            "download of a.iso",
            policy(5, Some(30)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "timed out after 30ms waiting for download of a.iso");
        let failure = err.lifecycle_failure(7).unwrap();
        assert_eq!(failure.message, "Timed out after 30ms waiting for download of a.iso");
        assert_eq!(failure.code, ErrorCode::PollTimeout);
        assert!(failure.category.is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path())
            .pending_polls(u32::MAX)
            .build();
        let (client, id) = enqueued(&mock);

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let started = std::time::Instant::now();
        let err = wait_until_processed(&client, &id, "a.iso", policy(60_000, None), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, PollError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            err.lifecycle_failure(42).unwrap().message,
            "Provisioning of job 42 was cancelled"
        );
    }

    #[tokio::test]
    async fn test_cancel_does_not_wait_for_hung_status_call() {
        let client = stalled(Duration::from_secs(2));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = wait_until_processed(
            &client,
            &RequestId::new("stalled"),
            "a.iso",
            policy(10, None),
            &token,
        )
        .await
        .unwrap_err();
        assert_eq!(err, PollError::Cancelled);
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "cancel took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_deadline_does_not_wait_for_hung_status_call() {
        let client = stalled(Duration::from_secs(2));
        let started = std::time::Instant::now();
        let err = wait_until_processed(
            &client,
            &RequestId::new("stalled"),
            "a.iso",
            policy(10, Some(50)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_status_error_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCacheService::builder(dir.path()).build();
        let client: Arc<dyn CacheServiceClient> = Arc::new(mock);
        let err = wait_until_processed(
            &client,
            &RequestId::new("missing"),
            "a.iso",
            policy(1, None),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Status(CacheServiceError::UnknownRequest(_))));
        assert!(err.lifecycle_failure(1).is_none());
    }
}
