//! Asset lookup in the shared factory directory, used when the worker runs
//! without a cache.

use crate::asset_cache::CachedAsset;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmprov_common::{AssetKind, ErrorCode, JobSettings, ProvisionFailure};

/// `<share_dir>/factory/<kind>/<value>`, then `.../<kind>/fixed/<value>`.
/// Absolute values are taken as they are.
pub fn locate_asset(share_dir: &Path, kind: AssetKind, value: &str) -> Option<PathBuf> {
    let given = Path::new(value);
    if given.is_absolute() {
        return given.exists().then(|| given.to_path_buf());
    }
    let base = share_dir.join("factory").join(kind.as_str());
    [base.join(value), base.join("fixed").join(value)]
        .into_iter()
        .find(|candidate| candidate.exists())
}

pub fn locate_assets(
    share_dir: &Path,
    settings: &JobSettings,
    assets: &BTreeMap<String, AssetKind>,
) -> Result<Vec<CachedAsset>, ProvisionFailure> {
    let mut located = Vec::with_capacity(assets.len());
    for (key, kind) in assets {
        let Some(value) = settings.get_str(key) else {
            continue;
        };
        let path = locate_asset(share_dir, *kind, &value).ok_or_else(|| {
            ProvisionFailure::asset(
                ErrorCode::AssetNotFound,
                format!("Cannot find {key} asset {kind}/{value}!"),
            )
        })?;
        debug!(setting = %key, path = %path.display(), "Found local asset");
        located.push(CachedAsset {
            setting_key: key.clone(),
            asset: value,
            path,
        });
    }
    Ok(located)
}
