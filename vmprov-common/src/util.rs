//! Shared helpers for log output and error messages.

use crate::settings::JobSettings;
use std::io;

const SENSITIVE_KEY_PARTS: &[&str] = &["PASSWORD", "SECRET", "TOKEN", "API_KEY", "PRIVATE_KEY"];

/// Whether a setting name holds a credential that must not be logged.
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| upper.contains(part))
}

/// Replace `user:password@` in a URL-like string with `user:***@`.
pub fn mask_url_credentials(value: &str) -> String {
    let Some((scheme, rest)) = value.split_once("://") else {
        return value.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    match authority.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split_once(':').map_or(userinfo, |(u, _)| u);
            if userinfo.contains(':') {
                format!("{scheme}://{user}:***@{host}{tail}")
            } else {
                value.to_string()
            }
        }
        None => value.to_string(),
    }
}

/// One-line `KEY=value` rendering of settings for debug logs, with
/// credentials masked.
pub fn format_settings(settings: &JobSettings) -> String {
    settings
        .iter()
        .map(|(key, value)| {
            if is_sensitive_key(key) {
                format!("{key}=***")
            } else {
                format!("{key}={}", mask_url_credentials(&value.as_string()))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable reason for an I/O error, without the `(os error N)` tail.
pub fn describe_io_error(err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return "Permission denied".to_string();
    }
    let text = err.to_string();
    match text.rfind(" (os error ") {
        Some(idx) if text.ends_with(')') => text[..idx].to_string(),
        _ => text,
    }
}
