//! The resolved variable file consumed by the test engine.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmprov_common::util::describe_io_error;
use vmprov_common::{ErrorCode, JobSettings, ProvisionFailure};

pub const VARS_FILE: &str = "vars.json";

fn write_failure(path: &Path, reason: impl std::fmt::Display) -> ProvisionFailure {
    ProvisionFailure::workspace(
        ErrorCode::VarsWriteFailed,
        format!("Unable to write {}: {reason}", path.display()),
    )
}

/// Write `<pool_dir>/vars.json` with sorted keys, replacing it atomically.
pub fn write_vars(pool_dir: &Path, settings: &JobSettings) -> Result<PathBuf, ProvisionFailure> {
    let path = pool_dir.join(VARS_FILE);
    let tmp = pool_dir.join(format!(".{VARS_FILE}.tmp"));

    let json = serde_json::to_vec_pretty(settings).map_err(|e| write_failure(&path, e))?;
    let written = std::fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&json)?;
        file.write_all(b"\n")?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| std::fs::rename(&tmp, &path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_failure(&path, describe_io_error(&err)));
    }

    debug!(path = %path.display(), count = settings.len(), "Wrote variable file");
    Ok(path)
}
