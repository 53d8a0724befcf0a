//! Job settings: the string/number "settings bag" handed to a worker.
//!
//! Keys follow naming conventions (`ISO_1`, `HDD_2`, `ASSET_1_URL`, ...)
//! that are interpreted by [`crate::asset`]. This module only stores values
//! and answers generic questions about them (truthiness, path shape).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A single setting value as delivered by the webUI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(serde_json::Number),
    Text(String),
}

impl SettingValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// String view of the value; numbers are rendered the way JSON prints them.
    pub fn as_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }

    /// Settings convention: empty, `"0"` and numeric zero are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(s) => !(s.is_empty() || s == "0"),
            Self::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    /// Whether the value is an absolute filesystem path.
    pub fn is_absolute_path(&self) -> bool {
        match self {
            Self::Text(s) => Path::new(s).is_absolute(),
            Self::Number(_) => false,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for SettingValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Ordered settings mapping. Ordering keeps logs and the written
/// variable file deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSettings(BTreeMap<String, SettingValue>);

impl JobSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    /// String value of `key`, `None` when unset or empty.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .filter(|v| !v.is_empty())
            .map(SettingValue::as_string)
    }

    pub fn is_truthy(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(SettingValue::is_truthy)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.0.remove(key)
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge_from(&mut self, other: &JobSettings) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, SettingValue> {
        &self.0
    }
}

impl<K, V> FromIterator<(K, V)> for JobSettings
where
    K: Into<String>,
    V: Into<SettingValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Whether a setting value refers to a remote location rather than a path.
pub fn is_url_like(value: &str) -> bool {
    value.contains("://") || value.starts_with("git@")
}
