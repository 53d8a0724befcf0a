//! Contract with the worker-local cache service.
//!
//! The cache service downloads assets and synchronizes test trees on behalf
//! of workers. A client enqueues a [`CacheRequest`], receives an opaque
//! [`RequestId`] and polls [`CacheStatus`] until the request is processed.
//! Download, decompression and rsync execution happen inside the service.

use crate::asset::AssetKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors talking to the cache service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheServiceError {
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Invalid response from cache service: {0}")]
    InvalidResponse(String),

    #[error("Unknown request {0}")]
    UnknownRequest(String),
}

/// Opaque id of an enqueued request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub job_id: u64,
    /// Asset name as given in the job settings.
    pub asset: String,
    pub kind: AssetKind,
    pub host: String,
    /// Explicit download source from a `<KEY>_URL` / `<KEY>_DECOMPRESS_URL` sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub decompress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsyncRequest {
    pub from: String,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum CacheRequest {
    Asset(AssetRequest),
    Rsync(RsyncRequest),
}

impl CacheRequest {
    /// Short label for logs and timeout messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Asset(req) => format!("download of {}", req.asset),
            Self::Rsync(req) => format!("rsync from '{}'", req.from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Running,
    Processed,
    #[serde(other)]
    Unknown,
}

/// Polled status of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub status: RequestState,
    /// Log output of the service-side task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Task result; for rsync either `"exit code N"` or a bare number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStatus {
    pub fn pending() -> Self {
        Self {
            status: RequestState::Pending,
            output: None,
            result: None,
            error: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == RequestState::Processed
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Result rendered as text, `None` when absent.
    pub fn result_text(&self) -> Option<String> {
        match self.result.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn exit_code(&self) -> Option<i64> {
        match self.result.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => parse_exit_code(s),
            _ => None,
        }
    }
}

/// Parse `"exit code N"` or `"N"`.
pub fn parse_exit_code(result: &str) -> Option<i64> {
    let trimmed = result.trim();
    trimmed
        .strip_prefix("exit code")
        .unwrap_or(trimmed)
        .trim()
        .parse()
        .ok()
}

/// Worker and job counters reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheServiceInfo {
    pub active_workers: u32,
    pub inactive_workers: u32,
    pub active_jobs: u32,
    pub inactive_jobs: u32,
}

impl CacheServiceInfo {
    pub fn availability_error(&self) -> Option<String> {
        (self.active_workers == 0).then(|| "No workers active in the cache service".to_string())
    }
}

/// Directory name used for a webUI host below the cache directory.
///
/// Scheme, credentials, port and path are stripped so that
/// `http://openqa.example.com:80/` and `openqa.example.com` share a cache.
pub fn host_dir_name(webui_host: &str) -> String {
    let without_scheme = webui_host
        .split_once("://")
        .map_or(webui_host, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    };
    if host.is_empty() {
        webui_host.to_string()
    } else {
        host.to_string()
    }
}

/// Basename of an asset value; values may carry directories.
pub fn asset_basename(asset: &str) -> &str {
    Path::new(asset)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(asset)
}

/// Capability to talk to a cache service.
pub trait CacheServiceClient: Send + Sync {
    fn info(&self) -> Result<CacheServiceInfo, CacheServiceError>;

    fn enqueue(&self, request: &CacheRequest) -> Result<RequestId, CacheServiceError>;

    fn status(&self, id: &RequestId) -> Result<CacheStatus, CacheServiceError>;

    /// Root directory the service writes into.
    fn cache_directory(&self) -> &Path;

    /// Location an asset for `host` occupies once cached.
    fn asset_path(&self, host: &str, asset: &str) -> PathBuf {
        self.cache_directory()
            .join(host_dir_name(host))
            .join(asset_basename(asset))
    }

    fn asset_exists(&self, host: &str, asset: &str) -> bool {
        self.asset_path(host, asset).is_file()
    }

    fn asset_request(
        &self,
        job_id: u64,
        asset: &str,
        kind: AssetKind,
        host: &str,
        url: Option<String>,
        decompress: bool,
    ) -> CacheRequest {
        CacheRequest::Asset(AssetRequest {
            job_id,
            asset: asset.to_string(),
            kind,
            host: host.to_string(),
            url,
            decompress,
        })
    }

    fn rsync_request(&self, from: &str, to: &Path) -> CacheRequest {
        CacheRequest::Rsync(RsyncRequest {
            from: from.to_string(),
            to: to.to_path_buf(),
        })
    }
}
