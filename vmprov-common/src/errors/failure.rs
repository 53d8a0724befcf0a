//! Structured provisioning failures and the result reported upstream.

use super::catalog::{ErrorCategory, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A failed provisioning step: human-readable message, optional category
/// and catalog code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionFailure {
    pub message: String,
    pub category: Option<ErrorCategory>,
    pub code: ErrorCode,
}

impl ProvisionFailure {
    /// Failure of the surrounding infrastructure; never categorised.
    pub fn infrastructure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: None,
            code,
        }
    }

    /// Failure caused by a specific asset.
    pub fn asset(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: Some(ErrorCategory::AssetFailure),
            code,
        }
    }

    /// Failure while preparing the pool directory or test tree.
    pub fn workspace(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::infrastructure(code, message)
    }

    pub fn is_asset_failure(&self) -> bool {
        self.category == Some(ErrorCategory::AssetFailure)
    }
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProvisionFailure {}

/// Outcome of a provisioning run; `error` absent means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ProvisioningResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<ProvisionFailure> for ProvisioningResult {
    fn from(failure: ProvisionFailure) -> Self {
        Self {
            error: Some(failure.message),
            category: failure.category,
            code: Some(failure.code.code_string()),
        }
    }
}

impl<T> From<Result<T, ProvisionFailure>> for ProvisioningResult {
    fn from(result: Result<T, ProvisionFailure>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(failure) => failure.into(),
        }
    }
}
