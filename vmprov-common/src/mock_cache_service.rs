//! Scripted in-process cache service for tests.
//!
//! Requests are recorded and answered from a script: each request stays
//! pending for a configurable number of polls, then completes with the
//! scripted outcome. Successful downloads create the asset file below the
//! cache directory, successful rsyncs create the `tests` directory, so
//! coordinators observe the same filesystem effects as with a real service.

use crate::cache_service::{
    CacheRequest, CacheServiceClient, CacheServiceError, CacheServiceInfo, CacheStatus,
    RequestId, RequestState, asset_basename, host_dir_name,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scripted result of an asset download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAssetOutcome {
    /// File is written into the cache.
    Available,
    /// Processed without producing the file (404 from the webUI).
    NotFound,
    /// Service-side failure reported through the status error field.
    Error(String),
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    requests: Vec<CacheRequest>,
    pending: HashMap<RequestId, (CacheRequest, u32)>,
    completed: HashMap<RequestId, CacheStatus>,
    status_calls: usize,
    info_calls: usize,
    rsync_results: VecDeque<String>,
}

/// In-process [`CacheServiceClient`] driven by a script.
#[derive(Debug, Clone)]
pub struct MockCacheService {
    cache_dir: PathBuf,
    info: Result<CacheServiceInfo, CacheServiceError>,
    outcomes: HashMap<String, MockAssetOutcome>,
    enqueue_errors: HashMap<String, String>,
    rsync_enqueue_error: Option<String>,
    last_rsync_result: String,
    pending_polls: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockCacheService {
    pub fn builder(cache_dir: impl Into<PathBuf>) -> MockCacheServiceBuilder {
        MockCacheServiceBuilder::new(cache_dir.into())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every request enqueued so far, in order.
    pub fn requests(&self) -> Vec<CacheRequest> {
        self.state().requests.clone()
    }

    /// Asset names of enqueued downloads, in order.
    pub fn requested_assets(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                CacheRequest::Asset(a) => Some(a.asset.clone()),
                CacheRequest::Rsync(_) => None,
            })
            .collect()
    }

    pub fn rsync_request_count(&self) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| matches!(r, CacheRequest::Rsync(_)))
            .count()
    }

    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }

    pub fn info_calls(&self) -> usize {
        self.state().info_calls
    }

    fn complete(&self, request: &CacheRequest) -> CacheStatus {
        match request {
            CacheRequest::Asset(req) => {
                let outcome = self
                    .outcomes
                    .get(&req.asset)
                    .cloned()
                    .unwrap_or(MockAssetOutcome::Available);
                match outcome {
                    MockAssetOutcome::Available => {
                        let path = self.asset_path(&req.host, &req.asset);
                        let written = path
                            .parent()
                            .map_or(Ok(()), std::fs::create_dir_all)
                            .and_then(|()| std::fs::write(&path, req.asset.as_bytes()));
                        match written {
                            Ok(()) => processed(
                                format!("Download of \"{}\" successful", path.display()),
                                None,
                            ),
                            Err(err) => CacheStatus {
                                error: Some(err.to_string()),
                                ..processed(String::new(), None)
                            },
                        }
                    }
                    MockAssetOutcome::NotFound => processed(
                        format!(
                            "Download of \"{}\" failed: 404 Not Found",
                            self.asset_path(&req.host, &req.asset).display()
                        ),
                        None,
                    ),
                    MockAssetOutcome::Error(message) => CacheStatus {
                        error: Some(message),
                        ..processed(String::new(), None)
                    },
                }
            }
            CacheRequest::Rsync(req) => {
                let result = {
                    let mut state = self.state();
                    state
                        .rsync_results
                        .pop_front()
                        .unwrap_or_else(|| self.last_rsync_result.clone())
                };
                if crate::cache_service::parse_exit_code(&result) == Some(0) {
                    let _ = std::fs::create_dir_all(req.to.join("tests"));
                }
                processed(
                    format!("rsync {} {}", req.from, req.to.display()),
                    Some(result),
                )
            }
        }
    }
}

fn processed(output: String, result: Option<String>) -> CacheStatus {
    CacheStatus {
        status: RequestState::Processed,
        output: Some(output),
        result: result.map(serde_json::Value::String),
        error: None,
    }
}

impl CacheServiceClient for MockCacheService {
    fn info(&self) -> Result<CacheServiceInfo, CacheServiceError> {
        self.state().info_calls += 1;
        self.info.clone()
    }

    fn enqueue(&self, request: &CacheRequest) -> Result<RequestId, CacheServiceError> {
        let rejection = match request {
            CacheRequest::Asset(req) => self.enqueue_errors.get(&req.asset).cloned(),
            CacheRequest::Rsync(_) => self.rsync_enqueue_error.clone(),
        };
        let mut state = self.state();
        state.requests.push(request.clone());
        if let Some(message) = rejection {
            return Err(CacheServiceError::Rejected(message));
        }
        state.next_id += 1;
        let id = RequestId::new(format!("mock-{}", state.next_id));
        state
            .pending
            .insert(id.clone(), (request.clone(), self.pending_polls));
        Ok(id)
    }

    fn status(&self, id: &RequestId) -> Result<CacheStatus, CacheServiceError> {
        let request = {
            let mut state = self.state();
            state.status_calls += 1;
            if let Some(done) = state.completed.get(id) {
                return Ok(done.clone());
            }
            let Some((request, remaining)) = state.pending.get_mut(id) else {
                return Err(CacheServiceError::UnknownRequest(id.to_string()));
            };
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(CacheStatus {
                    status: RequestState::Running,
                    ..CacheStatus::pending()
                });
            }
            request.clone()
        };
        let status = self.complete(&request);
        self.state().completed.insert(id.clone(), status.clone());
        Ok(status)
    }

    fn cache_directory(&self) -> &Path {
        &self.cache_dir
    }
}

#[derive(Debug, Clone)]
pub struct MockCacheServiceBuilder {
    cache_dir: PathBuf,
    info: Result<CacheServiceInfo, CacheServiceError>,
    outcomes: HashMap<String, MockAssetOutcome>,
    enqueue_errors: HashMap<String, String>,
    rsync_enqueue_error: Option<String>,
    rsync_results: VecDeque<String>,
    pending_polls: u32,
}

impl MockCacheServiceBuilder {
    fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            info: Ok(CacheServiceInfo {
                active_workers: 1,
                ..Default::default()
            }),
            outcomes: HashMap::new(),
            enqueue_errors: HashMap::new(),
            rsync_enqueue_error: None,
            rsync_results: VecDeque::new(),
            pending_polls: 0,
        }
    }

    pub fn info(mut self, info: CacheServiceInfo) -> Self {
        self.info = Ok(info);
        self
    }

    /// `info()` fails as if the service were down.
    pub fn unreachable(mut self, message: impl Into<String>) -> Self {
        self.info = Err(CacheServiceError::Unreachable(message.into()));
        self
    }

    pub fn asset(mut self, asset: impl Into<String>, outcome: MockAssetOutcome) -> Self {
        self.outcomes.insert(asset.into(), outcome);
        self
    }

    pub fn enqueue_error(mut self, asset: impl Into<String>, message: impl Into<String>) -> Self {
        self.enqueue_errors.insert(asset.into(), message.into());
        self
    }

    pub fn rsync_enqueue_error(mut self, message: impl Into<String>) -> Self {
        self.rsync_enqueue_error = Some(message.into());
        self
    }

    /// Results handed out to successive rsync requests; the last one repeats.
    pub fn rsync_results<I, S>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rsync_results = results.into_iter().map(Into::into).collect();
        self
    }

    /// Number of polls answered with `running` before completing.
    pub fn pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn build(self) -> MockCacheService {
        let last_rsync_result = self
            .rsync_results
            .back()
            .cloned()
            .unwrap_or_else(|| "exit code 0".to_string());
        MockCacheService {
            cache_dir: self.cache_dir,
            info: self.info,
            outcomes: self.outcomes,
            enqueue_errors: self.enqueue_errors,
            rsync_enqueue_error: self.rsync_enqueue_error,
            last_rsync_result,
            pending_polls: self.pending_polls,
            state: Arc::new(Mutex::new(MockState {
                rsync_results: self.rsync_results,
                ..Default::default()
            })),
        }
    }
}

/// Path an rsync into `cache_dir` for `webui_host` targets.
pub fn rsync_target(cache_dir: &Path, webui_host: &str) -> PathBuf {
    cache_dir.join(host_dir_name(webui_host))
}

/// Cached location of `asset` for `webui_host`.
pub fn cached_asset_path(cache_dir: &Path, webui_host: &str, asset: &str) -> PathBuf {
    rsync_target(cache_dir, webui_host).join(asset_basename(asset))
}
