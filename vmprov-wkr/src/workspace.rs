//! Test case, product and needles locations for a job.
//!
//! In relative mode the test tree is linked into the pool directory and the
//! settings name the links; in absolute mode the settings carry absolute
//! paths into the tests root and nothing is linked.

use crate::symlink::link_repo;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmprov_common::settings::is_url_like;
use vmprov_common::{ErrorCode, JobSettings, ProvisionFailure};

pub const NEEDLES_LINK: &str = "needles";

/// Locations derived from DISTRI and VERSION alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultLayout {
    pub case_dir: PathBuf,
    pub product_dir: PathBuf,
    pub needles_dir: PathBuf,
}

impl DefaultLayout {
    pub fn compute(tests_root: &Path, distri: &str, version: Option<&str>) -> Self {
        let versioned = version
            .filter(|v| !v.is_empty())
            .map(|v| tests_root.join(format!("{distri}-{v}")))
            .filter(|dir| dir.is_dir());
        let case_dir = versioned.unwrap_or_else(|| tests_root.join(distri));

        let products = case_dir.join("products").join(distri);
        let product_dir = if products.is_dir() {
            products
        } else {
            case_dir.clone()
        };
        let needles_dir = product_dir.join("needles");

        Self {
            case_dir,
            product_dir,
            needles_dir,
        }
    }

    /// Product directory relative to the case directory, `.` when equal.
    pub fn relative_product_dir(&self) -> String {
        match self.product_dir.strip_prefix(&self.case_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => self.product_dir.display().to_string(),
        }
    }
}

/// Where a workspace setting points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Entry inside the pool directory.
    InPool(String),
    /// Path or URL used as given.
    Direct(String),
}

impl Location {
    pub fn as_setting(&self) -> &str {
        match self {
            Self::InPool(name) | Self::Direct(name) => name,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub case_dir: Location,
    pub product_dir: Location,
    pub needles_dir: Location,
}

impl WorkspacePaths {
    /// Write `CASEDIR`, `PRODUCTDIR` and `NEEDLES_DIR` into `settings`.
    pub fn apply(&self, settings: &mut JobSettings) {
        settings.insert("CASEDIR", self.case_dir.as_setting());
        settings.insert("PRODUCTDIR", self.product_dir.as_setting());
        settings.insert("NEEDLES_DIR", self.needles_dir.as_setting());
    }
}

pub struct WorkspaceResolver<'a> {
    tests_root: &'a Path,
    pool_dir: &'a Path,
}

impl<'a> WorkspaceResolver<'a> {
    pub fn new(tests_root: &'a Path, pool_dir: &'a Path) -> Self {
        Self {
            tests_root,
            pool_dir,
        }
    }

    /// Resolve the three locations, creating pool links in relative mode.
    pub fn resolve(&self, settings: &JobSettings) -> Result<WorkspacePaths, ProvisionFailure> {
        let absolute_mode = settings.is_truthy("ABSOLUTE_TEST_CONFIG_PATHS");
        let custom_case = settings.get_str("CASEDIR");
        let custom_product = settings.get_str("PRODUCTDIR");
        let custom_needles = settings.get_str("NEEDLES_DIR");

        let needs_default =
            custom_case.is_none() || custom_product.is_none() || custom_needles.is_none();
        let layout = match (needs_default, settings.get_str("DISTRI")) {
            (false, _) => None,
            (true, Some(distri)) => Some((
                DefaultLayout::compute(
                    self.tests_root,
                    plain_distri(&distri)?,
                    settings.get_str("VERSION").as_deref(),
                ),
                distri,
            )),
            (true, None) => {
                return Err(ProvisionFailure::workspace(
                    ErrorCode::DistriMissing,
                    "Unable to determine the test case directory: DISTRI is not set",
                ));
            }
        };
        debug!(
            ?layout,
            absolute_mode,
            tests_root = %self.tests_root.display(),
            "Resolving workspace"
        );

        if absolute_mode {
            let defaults = layout
                .as_ref()
                .map(|(l, _)| {
                    (
                        l.case_dir.display().to_string(),
                        l.product_dir.display().to_string(),
                        l.needles_dir.display().to_string(),
                    )
                })
                .unwrap_or_default();
            return Ok(WorkspacePaths {
                case_dir: Location::Direct(custom_case.unwrap_or(defaults.0)),
                product_dir: Location::Direct(custom_product.unwrap_or(defaults.1)),
                needles_dir: Location::Direct(custom_needles.unwrap_or(defaults.2)),
            });
        }

        let case_dir = match custom_case {
            Some(custom) => Location::Direct(custom),
            None => {
                let (layout, distri) = default_layout(&layout)?;
                link_repo(&layout.case_dir, self.pool_dir, distri)?;
                Location::InPool(distri.to_string())
            }
        };

        let needles_dir = match custom_needles {
            Some(custom) if is_url_like(&custom) || Path::new(&custom).is_absolute() => {
                Location::Direct(custom)
            }
            Some(relative) => {
                link_repo(&self.tests_root.join(relative), self.pool_dir, NEEDLES_LINK)?;
                Location::InPool(NEEDLES_LINK.to_string())
            }
            None => {
                let (layout, _) = default_layout(&layout)?;
                link_repo(&layout.needles_dir, self.pool_dir, NEEDLES_LINK)?;
                Location::InPool(NEEDLES_LINK.to_string())
            }
        };

        let product_dir = match custom_product {
            Some(custom) => Location::Direct(custom),
            None => Location::Direct(default_layout(&layout)?.0.relative_product_dir()),
        };

        Ok(WorkspacePaths {
            case_dir,
            product_dir,
            needles_dir,
        })
    }
}

/// DISTRI names a directory below the tests root and a link in the pool,
/// so it must be a single path component.
fn plain_distri(distri: &str) -> Result<&str, ProvisionFailure> {
    let plain = !distri.is_empty()
        && distri != "."
        && distri != ".."
        && !distri.contains(['/', '\\', '\0']);
    if plain {
        Ok(distri)
    } else {
        Err(ProvisionFailure::workspace(
            ErrorCode::InvalidDistri,
            format!("Invalid DISTRI '{distri}': must be a plain directory name"),
        ))
    }
}

fn default_layout(
    layout: &Option<(DefaultLayout, String)>,
) -> Result<(&DefaultLayout, &str), ProvisionFailure> {
    layout
        .as_ref()
        .map(|(layout, distri)| (layout, distri.as_str()))
        .ok_or_else(|| {
            ProvisionFailure::workspace(
                ErrorCode::DistriMissing,
                "Unable to determine the test case directory: DISTRI is not set",
            )
        })
}
