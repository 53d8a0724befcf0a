//! Environment variable parsing with type safety.
//!
//! Every variable carries the `VMPROV_` prefix. Parse errors are collected
//! rather than returned so a misconfigured worker reports all problems at
//! once.

use super::source::Sourced;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self {
            prefix: "VMPROV_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Optional string; an empty variable counts as unset.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }

    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u32>() {
                Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Duration in humantime notation (`5s`, `1m 30s`, `250ms`).
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match humantime::parse_duration(value.trim()) {
                Ok(d) => Sourced::from_env(d, var_name),
                Err(_) => {
                    self.errors.push(EnvError::InvalidDuration {
                        var: var_name,
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value,
                        });
                        Sourced::from_env(default.to_string(), var_name)
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(dirs) = directories::BaseDirs::new()
    {
        return dirs.home_dir().join(stripped);
    }
    PathBuf::from(value)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, env_test_lock};

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: serialized by env_test_lock
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: serialized by env_test_lock
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_get_u32_range() {
        let _guard = env_test_lock();
        let vars = ["VMPROV_TEST_U32"];
        cleanup_env(&vars);

        set_env("VMPROV_TEST_U32", "7");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u32_range("TEST_U32", 3, 1, 10).value, 7);
        assert!(!parser.has_errors());

        set_env("VMPROV_TEST_U32", "0");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u32_range("TEST_U32", 3, 1, 10).value, 3);
        assert!(matches!(
            parser.errors().first(),
            Some(EnvError::OutOfRange { .. })
        ));

        set_env("VMPROV_TEST_U32", "many");
        let mut parser = EnvParser::new();
        let result = parser.get_u32_range("TEST_U32", 3, 1, 10);
        assert!(result.is_default());
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_duration() {
        let _guard = env_test_lock();
        let vars = ["VMPROV_TEST_WAIT"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        let result = parser.get_duration("TEST_WAIT", Duration::from_secs(5));
        assert_eq!(result.value, Duration::from_secs(5));
        assert!(result.is_default());

        set_env("VMPROV_TEST_WAIT", "1m 30s");
        let mut parser = EnvParser::new();
        let result = parser.get_duration("TEST_WAIT", Duration::from_secs(5));
        assert_eq!(result.value, Duration::from_secs(90));
        assert_eq!(result.var.as_deref(), Some("VMPROV_TEST_WAIT"));

        set_env("VMPROV_TEST_WAIT", "soon");
        let mut parser = EnvParser::new();
        parser.get_duration("TEST_WAIT", Duration::from_secs(5));
        assert!(matches!(
            parser.take_errors().as_slice(),
            [EnvError::InvalidDuration { .. }]
        ));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_log_level() {
        let _guard = env_test_lock();
        let vars = ["VMPROV_TEST_LEVEL"];
        cleanup_env(&vars);

        set_env("VMPROV_TEST_LEVEL", "DEBUG");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_log_level("TEST_LEVEL", "info").value, "debug");

        set_env("VMPROV_TEST_LEVEL", "verbose");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_log_level("TEST_LEVEL", "info").value, "info");
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_optional_string_empty_is_none() {
        let _guard = env_test_lock();
        let vars = ["VMPROV_TEST_OPT"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        assert!(parser.get_optional_string("TEST_OPT").value.is_none());

        set_env("VMPROV_TEST_OPT", "");
        let mut parser = EnvParser::new();
        let result = parser.get_optional_string("TEST_OPT");
        assert!(result.value.is_none());
        assert_eq!(result.source, ConfigSource::Environment);

        set_env("VMPROV_TEST_OPT", "http://localhost:9530");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_optional_string("TEST_OPT").value.as_deref(),
            Some("http://localhost:9530")
        );

        cleanup_env(&vars);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home("/var/lib/openqa/cache"),
            PathBuf::from("/var/lib/openqa/cache")
        );
        assert_eq!(expand_home("cache"), PathBuf::from("cache"));
        if let Some(dirs) = directories::BaseDirs::new() {
            assert_eq!(expand_home("~/cache"), dirs.home_dir().join("cache"));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_env_parser_get_u32_never_panics(value in "[-0-9a-zA-Z.]{0,30}") {
                let _guard = env_test_lock();
                set_env("VMPROV_PROPTEST_U32", &value);
                let mut parser = EnvParser::new();
                let result = parser.get_u32_range("PROPTEST_U32", 5, 1, 100);
                prop_assert!((1..=100).contains(&result.value));
                cleanup_env(&["VMPROV_PROPTEST_U32"]);
            }

            #[test]
            fn test_env_parser_get_duration_never_panics(value in ".{0,20}") {
                let _guard = env_test_lock();
                prop_assume!(!value.contains('\0'));
                set_env("VMPROV_PROPTEST_DURATION", &value);
                let mut parser = EnvParser::new();
                let _ = parser.get_duration("PROPTEST_DURATION", Duration::from_secs(1));
                cleanup_env(&["VMPROV_PROPTEST_DURATION"]);
            }
        }
    }
}
