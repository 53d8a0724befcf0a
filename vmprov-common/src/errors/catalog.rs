//! Error catalog for vmprov.
//!
//! Every provisioning failure carries a unique code with a message summary
//! and remediation steps, so that the worker log and the CLI point the
//! operator at the right fix.
//!
//! # Error Code Ranges
//!
//! | Range      | Category     | Description                              |
//! |------------|--------------|------------------------------------------|
//! | E001-E019  | Config       | Configuration errors                     |
//! | E020-E039  | CacheService | Cache-service availability and requests  |
//! | E040-E059  | Asset        | Missing or undownloadable assets         |
//! | E060-E079  | Workspace    | Test tree, needles and pool links        |
//! | E080-E099  | Lifecycle    | Cancellation and timeouts                |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome category reported upstream.
///
/// Only asset problems are categorised; infrastructure failures leave the
/// category unset so retry and alerting logic can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    #[serde(rename = "asset failure")]
    AssetFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetFailure => "asset failure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSubsystem {
    Config,
    CacheService,
    Asset,
    Workspace,
    Lifecycle,
}

impl fmt::Display for ErrorSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::CacheService => write!(f, "cache_service"),
            Self::Asset => write!(f, "asset"),
            Self::Workspace => write!(f, "workspace"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// Error code enumeration covering all provisioning failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Config (E001-E019)
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,

    // CacheService (E020-E039)
    /// Cache service did not answer the info query
    CacheServiceUnreachable,
    /// Cache service has no active workers
    CacheServiceNoWorkers,
    /// Asset download request was rejected on enqueue
    AssetRequestRejected,
    /// Cache service reported an error while processing a request
    CacheRequestFailed,
    /// Rsync request was rejected on enqueue
    RsyncRequestRejected,
    /// Rsync of the test tree finished with a non-zero result
    RsyncFailed,

    // Asset (E040-E059)
    /// Asset could not be downloaded into the cache
    AssetDownloadFailed,
    /// Asset not found in the local factory directories
    AssetNotFound,

    // Workspace (E060-E079)
    /// Test case, product or needles source directory is missing
    SourceDirMissing,
    /// A link inside the pool directory could not be created
    SymlinkFailed,
    /// DISTRI is required to compute default locations
    DistriMissing,
    /// Pool directory could not be prepared
    PoolDirFailed,
    /// The variable file could not be written
    VarsWriteFailed,
    /// DISTRI is not a plain directory name
    InvalidDistri,

    // Lifecycle (E080-E099)
    /// Waiting for the cache service exceeded the configured limit
    PollTimeout,
    /// Provisioning was cancelled
    Cancelled,
}

/// Static catalog entry for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEntry {
    pub code: &'static str,
    pub subsystem: ErrorSubsystem,
    pub message: &'static str,
    pub remediation: &'static [&'static str],
}

impl ErrorCode {
    /// Numeric part of the code.
    pub fn number(&self) -> u16 {
        match self {
            Self::ConfigReadError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::CacheServiceUnreachable => 20,
            Self::CacheServiceNoWorkers => 21,
            Self::AssetRequestRejected => 22,
            Self::CacheRequestFailed => 23,
            Self::RsyncRequestRejected => 24,
            Self::RsyncFailed => 25,
            Self::AssetDownloadFailed => 40,
            Self::AssetNotFound => 41,
            Self::SourceDirMissing => 60,
            Self::SymlinkFailed => 61,
            Self::DistriMissing => 62,
            Self::PoolDirFailed => 63,
            Self::VarsWriteFailed => 64,
            Self::InvalidDistri => 65,
            Self::PollTimeout => 80,
            Self::Cancelled => 81,
        }
    }

    /// Code in `VP-Exxx` form.
    pub fn code_string(&self) -> String {
        format!("VP-E{:03}", self.number())
    }

    pub fn subsystem(&self) -> ErrorSubsystem {
        match self.number() {
            0..=19 => ErrorSubsystem::Config,
            20..=39 => ErrorSubsystem::CacheService,
            40..=59 => ErrorSubsystem::Asset,
            60..=79 => ErrorSubsystem::Workspace,
            _ => ErrorSubsystem::Lifecycle,
        }
    }

    pub fn entry(&self) -> ErrorEntry {
        let (code, message, remediation): (&'static str, &'static str, &'static [&'static str]) =
            match self {
                Self::ConfigReadError => (
                    "VP-E001",
                    "Configuration file could not be read",
                    &["Check the path passed with --config", "Check file permissions"],
                ),
                Self::ConfigParseError => (
                    "VP-E002",
                    "Configuration file is not valid TOML",
                    &["Validate the file with a TOML linter"],
                ),
                Self::ConfigValidationError => (
                    "VP-E003",
                    "Configuration contains invalid values",
                    &["Run with --verbose to list every invalid value"],
                ),
                Self::ConfigEnvError => (
                    "VP-E004",
                    "A VMPROV_* environment variable has an invalid value",
                    &["Unset the variable or fix its value"],
                ),
                Self::CacheServiceUnreachable => (
                    "VP-E020",
                    "Cache service not reachable",
                    &[
                        "Check that the cache service is running",
                        "Check cache_service.url in the worker configuration",
                    ],
                ),
                Self::CacheServiceNoWorkers => (
                    "VP-E021",
                    "Cache service has no active workers",
                    &["Start the cache service minion workers"],
                ),
                Self::AssetRequestRejected => (
                    "VP-E022",
                    "Asset request was rejected by the cache service",
                    &["Inspect the cache service log for the rejected request"],
                ),
                Self::CacheRequestFailed => (
                    "VP-E023",
                    "Cache service failed while processing a request",
                    &["Inspect the cache service log", "Retry the job"],
                ),
                Self::RsyncRequestRejected => (
                    "VP-E024",
                    "Rsync request was rejected by the cache service",
                    &["Inspect the cache service log for the rejected request"],
                ),
                Self::RsyncFailed => (
                    "VP-E025",
                    "Synchronizing the test tree failed",
                    &[
                        "Check that the rsync source is reachable from the worker",
                        "Check free space in the cache directory",
                    ],
                ),
                Self::AssetDownloadFailed => (
                    "VP-E040",
                    "Asset could not be downloaded",
                    &[
                        "Check that the asset exists on the webUI host",
                        "Check the <KEY>_URL setting if one is given",
                    ],
                ),
                Self::AssetNotFound => (
                    "VP-E041",
                    "Asset not found in the factory directories",
                    &["Check the share directory for factory/<kind>/<name>"],
                ),
                Self::SourceDirMissing => (
                    "VP-E060",
                    "Source directory does not exist",
                    &[
                        "Check DISTRI/VERSION against the tests checkout",
                        "Synchronize the tests directory",
                    ],
                ),
                Self::SymlinkFailed => (
                    "VP-E061",
                    "Link in the pool directory could not be created",
                    &["Check ownership and permissions of the pool directory"],
                ),
                Self::DistriMissing => (
                    "VP-E062",
                    "DISTRI is not set",
                    &["Set DISTRI or provide CASEDIR and NEEDLES_DIR explicitly"],
                ),
                Self::PoolDirFailed => (
                    "VP-E063",
                    "Pool directory could not be prepared",
                    &["Check ownership and free space of the pool directory"],
                ),
                Self::VarsWriteFailed => (
                    "VP-E064",
                    "Variable file could not be written",
                    &["Check ownership and free space of the pool directory"],
                ),
                Self::InvalidDistri => (
                    "VP-E065",
                    "DISTRI is not a plain directory name",
                    &["Set DISTRI to the name of a directory below the tests root"],
                ),
                Self::PollTimeout => (
                    "VP-E080",
                    "Timed out waiting for the cache service",
                    &["Raise cache_service.max_wait", "Check cache service load"],
                ),
                Self::Cancelled => (
                    "VP-E081",
                    "Provisioning was cancelled",
                    &["No action needed if the job was cancelled on purpose"],
                ),
            };
        ErrorEntry {
            code,
            subsystem: self.subsystem(),
            message,
            remediation,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ErrorCode] = &[
        ErrorCode::ConfigReadError,
        ErrorCode::ConfigParseError,
        ErrorCode::ConfigValidationError,
        ErrorCode::ConfigEnvError,
        ErrorCode::CacheServiceUnreachable,
        ErrorCode::CacheServiceNoWorkers,
        ErrorCode::AssetRequestRejected,
        ErrorCode::CacheRequestFailed,
        ErrorCode::RsyncRequestRejected,
        ErrorCode::RsyncFailed,
        ErrorCode::AssetDownloadFailed,
        ErrorCode::AssetNotFound,
        ErrorCode::SourceDirMissing,
        ErrorCode::SymlinkFailed,
        ErrorCode::DistriMissing,
        ErrorCode::PoolDirFailed,
        ErrorCode::VarsWriteFailed,
        ErrorCode::InvalidDistri,
        ErrorCode::PollTimeout,
        ErrorCode::Cancelled,
    ];

    #[test]
    fn test_entry_code_matches_number() {
        for code in ALL {
            assert_eq!(code.entry().code, code.code_string(), "{code:?}");
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.number()), "duplicate number for {code:?}");
        }
    }

    #[test]
    fn test_every_entry_has_remediation() {
        for code in ALL {
            assert!(!code.entry().remediation.is_empty(), "{code:?}");
        }
    }

    #[test]
    fn test_subsystem_ranges() {
        assert_eq!(ErrorCode::ConfigEnvError.subsystem(), ErrorSubsystem::Config);
        assert_eq!(
            ErrorCode::RsyncFailed.subsystem(),
            ErrorSubsystem::CacheService
        );
        assert_eq!(ErrorCode::AssetNotFound.subsystem(), ErrorSubsystem::Asset);
        assert_eq!(
            ErrorCode::SymlinkFailed.subsystem(),
            ErrorSubsystem::Workspace
        );
        assert_eq!(ErrorCode::Cancelled.subsystem(), ErrorSubsystem::Lifecycle);
    }

    #[test]
    fn test_category_serializes_as_marker() {
        assert_eq!(
            serde_json::to_string(&ErrorCategory::AssetFailure).unwrap(),
            "\"asset failure\""
        );
        assert_eq!(ErrorCategory::AssetFailure.to_string(), "asset failure");
    }
}
