//! HTTP client for the cache service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET  /info`          worker and job counters
//! - `POST /enqueue`       JSON [`CacheRequest`], answers `{"id": "..."}`
//! - `GET  /status/<id>`   JSON [`CacheStatus`]

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use vmprov_common::{
    CacheRequest, CacheServiceClient, CacheServiceError, CacheServiceInfo, CacheStatus, RequestId,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    id: serde_json::Value,
}

pub struct HttpCacheServiceClient {
    base_url: String,
    cache_dir: PathBuf,
    agent: ureq::Agent,
}

impl HttpCacheServiceClient {
    pub fn new(base_url: &str, cache_dir: impl Into<PathBuf>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_dir: cache_dir.into(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn transport_error(err: ureq::Error) -> CacheServiceError {
    match err {
        ureq::Error::StatusCode(code) => CacheServiceError::Rejected(format!("HTTP status {code}")),
        other => CacheServiceError::Unreachable(other.to_string()),
    }
}

fn decode_error(err: ureq::Error) -> CacheServiceError {
    CacheServiceError::InvalidResponse(err.to_string())
}

impl CacheServiceClient for HttpCacheServiceClient {
    fn info(&self) -> Result<CacheServiceInfo, CacheServiceError> {
        let mut response = self
            .agent
            .get(&self.url("info"))
            .call()
            .map_err(|err| CacheServiceError::Unreachable(err.to_string()))?;
        response.body_mut().read_json().map_err(decode_error)
    }

    fn enqueue(&self, request: &CacheRequest) -> Result<RequestId, CacheServiceError> {
        let mut response = self
            .agent
            .post(&self.url("enqueue"))
            .send_json(request)
            .map_err(transport_error)?;
        let body: EnqueueResponse = response.body_mut().read_json().map_err(decode_error)?;
        let id = match body.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(CacheServiceError::InvalidResponse(format!(
                    "unexpected request id {other}"
                )));
            }
        };
        debug!(request = %id, "Enqueued {}", request.describe());
        Ok(RequestId::new(id))
    }

    fn status(&self, id: &RequestId) -> Result<CacheStatus, CacheServiceError> {
        let mut response = self
            .agent
            .get(&self.url(&format!("status/{id}")))
            .call()
            .map_err(|err| match err {
                ureq::Error::StatusCode(404) => CacheServiceError::UnknownRequest(id.to_string()),
                other => transport_error(other),
            })?;
        response.body_mut().read_json().map_err(decode_error)
    }

    fn cache_directory(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpCacheServiceClient::new("http://127.0.0.1:9530/", "/var/lib/openqa/cache");
        assert_eq!(client.url("info"), "http://127.0.0.1:9530/info");
        assert_eq!(
            client.asset_path("openqa.example.com", "foo.iso"),
            PathBuf::from("/var/lib/openqa/cache/openqa.example.com/foo.iso")
        );
    }

    #[test]
    fn test_unreachable_service() {
        // Port 9 (discard) is closed on test hosts.
        let client = HttpCacheServiceClient::new("http://127.0.0.1:9", "/tmp");
        assert!(matches!(client.info(), Err(CacheServiceError::Unreachable(_))));
    }

    #[test]
    fn test_status_code_becomes_rejection() {
        assert_eq!(
            transport_error(ureq::Error::StatusCode(503)),
            CacheServiceError::Rejected("HTTP status 503".to_string())
        );
    }
}
