//! Asset-key grammar and classification.
//!
//! Setting names encode what a value is. The grammar recognised here:
//!
//! | Key                         | Meaning                                     |
//! |-----------------------------|---------------------------------------------|
//! | `ISO`, `ISO_<n>`            | installation media (`iso`)                  |
//! | `HDD_<n>`                   | disk image (`hdd`)                          |
//! | `UEFI_PFLASH_VARS`          | disk image, only when the value is relative |
//! | `KERNEL`, `INITRD`          | other asset                                 |
//! | `ASSET_<n>`                 | other asset                                 |
//! | `<KEY>_URL`                 | download source for `<KEY>`                 |
//! | `<KEY>_DECOMPRESS_URL`      | compressed download source for `<KEY>`      |
//! | `NUMDISKS`                  | metadata, never an asset                    |
//!
//! `<n>` is one or more ASCII digits. Everything else is a plain setting.
//!
//! `HDD_<n>` maps to `hdd`, not `other`: numbered disks are disk
//! images just like a relative `UEFI_PFLASH_VARS`, stored under
//! `factory/hdd` and requested from the cache service with type `hdd`.

use crate::settings::{JobSettings, SettingValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const URL_SUFFIX: &str = "_URL";
const DECOMPRESS_URL_SUFFIX: &str = "_DECOMPRESS_URL";

/// Kind of an asset; doubles as the factory sub-directory and the
/// cache-request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Iso,
    Hdd,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Hdd => "hdd",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which download source a sidecar key provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidecar {
    Url,
    DecompressUrl,
}

impl Sidecar {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Url => URL_SUFFIX,
            Self::DecompressUrl => DECOMPRESS_URL_SUFFIX,
        }
    }
}

/// A setting key parsed against the grammar above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingKey<'a> {
    Iso,
    Hdd,
    PflashVars,
    Other,
    /// Download source for the primary key `primary`.
    Sidecar { primary: &'a str, sidecar: Sidecar },
    Metadata,
    Plain,
}

impl<'a> SettingKey<'a> {
    pub fn parse(key: &'a str) -> Self {
        if key == "NUMDISKS" {
            return Self::Metadata;
        }
        // The decompress suffix also ends in `_URL`; check it first.
        if let Some(primary) = key.strip_suffix(DECOMPRESS_URL_SUFFIX) {
            return Self::Sidecar {
                primary,
                sidecar: Sidecar::DecompressUrl,
            };
        }
        if let Some(primary) = key.strip_suffix(URL_SUFFIX) {
            return Self::Sidecar {
                primary,
                sidecar: Sidecar::Url,
            };
        }
        match key {
            "ISO" => Self::Iso,
            "UEFI_PFLASH_VARS" => Self::PflashVars,
            "KERNEL" | "INITRD" => Self::Other,
            _ if is_numbered(key, "ISO_") => Self::Iso,
            // Disk image, same factory directory as UEFI_PFLASH_VARS.
            _ if is_numbered(key, "HDD_") => Self::Hdd,
            _ if is_numbered(key, "ASSET_") => Self::Other,
            _ => Self::Plain,
        }
    }

    /// Asset kind for this key given its value, `None` when not an asset.
    pub fn asset_kind(&self, value: &SettingValue) -> Option<AssetKind> {
        match self {
            Self::Iso => Some(AssetKind::Iso),
            Self::Hdd => Some(AssetKind::Hdd),
            // An absolute path is a template shipped with the host (for
            // example under /usr/share/qemu) and is consumed in place.
            Self::PflashVars if !value.is_absolute_path() => Some(AssetKind::Hdd),
            Self::Other => Some(AssetKind::Other),
            _ => None,
        }
    }
}

fn is_numbered(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// A setting key identified as an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub setting_key: String,
    pub kind: AssetKind,
}

/// Map every asset setting to its kind.
///
/// Pure function of the settings; keys with an empty value are skipped.
pub fn classify(settings: &JobSettings) -> BTreeMap<String, AssetKind> {
    settings
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(key, value)| {
            SettingKey::parse(key)
                .asset_kind(value)
                .map(|kind| (key.clone(), kind))
        })
        .collect()
}

/// Same as [`classify`] but as descriptors, in key order.
pub fn asset_descriptors(settings: &JobSettings) -> Vec<AssetDescriptor> {
    classify(settings)
        .into_iter()
        .map(|(setting_key, kind)| AssetDescriptor { setting_key, kind })
        .collect()
}

/// Download source configured for `key`, preferring the decompressing one.
///
/// Returns the URL and whether the downloaded file must be decompressed.
pub fn download_source(settings: &JobSettings, key: &str) -> Option<(String, bool)> {
    let sidecar = |s: Sidecar| settings.get_str(&format!("{key}{}", s.suffix()));
    if let Some(url) = sidecar(Sidecar::DecompressUrl) {
        return Some((url.trim().to_string(), true));
    }
    sidecar(Sidecar::Url).map(|url| (url.trim().to_string(), false))
}

/// Sidecar keys whose primary asset key is absent or empty.
///
/// These are dropped rather than fetched on their own.
pub fn orphan_sidecars(settings: &JobSettings) -> Vec<String> {
    settings
        .keys()
        .filter(|key| match SettingKey::parse(key) {
            SettingKey::Sidecar { primary, .. } => {
                is_asset_name(primary) && settings.get_str(primary).is_none()
            }
            _ => false,
        })
        .cloned()
        .collect()
}

fn is_asset_name(key: &str) -> bool {
    matches!(
        SettingKey::parse(key),
        SettingKey::Iso | SettingKey::Hdd | SettingKey::PflashVars | SettingKey::Other
    )
}
