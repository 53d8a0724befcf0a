//! Links from the pool directory to assets and test repositories.

use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vmprov_common::util::describe_io_error;
use vmprov_common::{ErrorCode, ProvisionFailure};

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn create_link(source: &Path, link: &Path) -> Result<(), ProvisionFailure> {
    if link.symlink_metadata().is_ok() {
        debug!(link = %link.display(), "Pool entry already exists, leaving it in place");
        return Ok(());
    }
    symlink(source, link).map_err(|err| {
        ProvisionFailure::workspace(
            ErrorCode::SymlinkFailed,
            format!(
                "Cannot create symlink from \"{}\" to \"{}\": {}",
                source.display(),
                link.display(),
                describe_io_error(&err)
            ),
        )
    })?;
    debug!(source = %source.display(), link = %link.display(), "Created symlink");
    Ok(())
}

/// Link `source` into `pool_dir` under its basename and return that name.
pub fn link_asset(source: &Path, pool_dir: &Path) -> Result<String, ProvisionFailure> {
    let source = absolute(source);
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ProvisionFailure::workspace(
                ErrorCode::SymlinkFailed,
                format!("Cannot link asset without a file name: {}", source.display()),
            )
        })?;
    create_link(&source, &pool_dir.join(&name))?;
    debug!(asset = %name, "Linked asset into pool");
    Ok(name)
}

/// Link the directory `source_dir` into `pool_dir` as `name`.
pub fn link_repo(source_dir: &Path, pool_dir: &Path, name: &str) -> Result<(), ProvisionFailure> {
    let source_dir = absolute(source_dir);
    if !source_dir.is_dir() {
        return Err(ProvisionFailure::workspace(
            ErrorCode::SourceDirMissing,
            format!("The source directory {} does not exist", source_dir.display()),
        ));
    }
    let link = pool_dir.join(name);
    create_link(&source_dir, &link)?;
    info!("Symlinked from \"{}\" to \"{}\"", link.display(), source_dir.display());
    Ok(())
}
