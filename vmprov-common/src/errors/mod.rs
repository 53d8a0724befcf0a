//! Error catalog and provisioning failure types.
//!
//! Codes are grouped by subsystem (see [`catalog`]); every failure handed
//! back to the worker carries one so the CLI can print remediation steps.

pub mod catalog;
pub mod failure;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry, ErrorSubsystem};
pub use failure::{ProvisionFailure, ProvisioningResult};
