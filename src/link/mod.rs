//! Link farm construction.
//!
//! For one category root and one package, every manifest entry becomes a
//! symlink `<category_root>/<package>/<basename>` pointing at the absolute
//! path of the entry inside the package source tree. Nested entries are
//! flattened to their basename.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::cleanup::CleanupContext;
use crate::error::SpmError;
use crate::runtime::path::flattened_name;
use crate::runtime::{Runtime, io_error_kind, normalize_path, occupied};

/// One link to create: `dest` -> `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub target: PathBuf,
    pub dest: PathBuf,
}

pub struct LinkFarmBuilder<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> LinkFarmBuilder<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }

    /// Per-package folder inside a category root.
    pub fn package_dir(category_root: &Path, name: &str) -> PathBuf {
        category_root.join(name)
    }

    /// Compute source and destination for each entry, in order.
    pub fn plan_entries(
        category_root: &Path,
        name: &str,
        source_root: &Path,
        relative_paths: &[String],
    ) -> Result<Vec<PlannedLink>, SpmError> {
        let package_dir = Self::package_dir(category_root, name);

        relative_paths
            .iter()
            .map(|entry| {
                let rel = normalize_path(Path::new(entry));
                if rel.is_absolute() {
                    return Err(SpmError::InvalidManifestEntry {
                        entry: entry.clone(),
                        reason: "path must be relative to the package root".into(),
                    });
                }
                if matches!(rel.components().next(), Some(Component::ParentDir)) {
                    return Err(SpmError::InvalidManifestEntry {
                        entry: entry.clone(),
                        reason: "path leaves the package root".into(),
                    });
                }
                let file_name = flattened_name(&rel).ok_or_else(|| {
                    SpmError::InvalidManifestEntry {
                        entry: entry.clone(),
                        reason: "path has no file name".into(),
                    }
                })?;

                Ok(PlannedLink {
                    target: source_root.join(&rel),
                    dest: package_dir.join(file_name),
                })
            })
            .collect()
    }

    /// Plan the links and verify they can all be created: every target exists,
    /// no destination is occupied on disk, and no destination appears twice
    /// in `claimed` (which accumulates across categories).
    pub fn plan(
        &self,
        category_root: &Path,
        name: &str,
        source_root: &Path,
        relative_paths: &[String],
        claimed: &mut HashSet<PathBuf>,
    ) -> Result<Vec<PlannedLink>, SpmError> {
        let planned = Self::plan_entries(category_root, name, source_root, relative_paths)?;

        for link in &planned {
            if !claimed.insert(link.dest.clone()) || occupied(self.runtime, &link.dest) {
                return Err(SpmError::LinkCollision {
                    dest: link.dest.clone(),
                    owner: None,
                });
            }
            if !self.runtime.exists(&link.target) {
                return Err(SpmError::LinkTargetMissing {
                    dest: link.dest.clone(),
                    target: link.target.clone(),
                });
            }
        }

        Ok(planned)
    }

    /// Create `<category_root>/<name>` if missing. A folder created here is
    /// registered for cleanup; a pre-existing one is left alone.
    pub fn ensure_package_dir(
        &self,
        category_root: &Path,
        name: &str,
        cleanup: &mut CleanupContext,
    ) -> Result<PathBuf, SpmError> {
        let dir = Self::package_dir(category_root, name);
        if !self.runtime.is_dir(&dir) {
            self.create_dir(&dir)?;
            cleanup.add_dir(dir.clone());
        }
        Ok(dir)
    }

    /// Link every entry of one category, returning the created destinations
    /// in manifest order.
    ///
    /// Each link is registered in `cleanup` as soon as it exists. On failure
    /// the links made so far stay on disk; undoing them is the caller's call.
    #[tracing::instrument(skip(self, relative_paths, cleanup))]
    pub fn link(
        &self,
        category_root: &Path,
        name: &str,
        source_root: &Path,
        relative_paths: &[String],
        cleanup: &mut CleanupContext,
    ) -> Result<Vec<PathBuf>, SpmError> {
        self.ensure_package_dir(category_root, name, cleanup)?;

        let planned = Self::plan_entries(category_root, name, source_root, relative_paths)?;
        let mut created = Vec::with_capacity(planned.len());

        for PlannedLink { target, dest } in planned {
            if occupied(self.runtime, &dest) {
                return Err(SpmError::LinkCollision { dest, owner: None });
            }
            if !self.runtime.exists(&target) {
                return Err(SpmError::LinkTargetMissing { dest, target });
            }
            if let Some(parent) = dest.parent()
                && !self.runtime.is_dir(parent)
            {
                self.create_dir(parent)?;
                cleanup.add_dir(parent.to_path_buf());
            }

            info!("Linking {:?} -> {:?}", target, dest);
            self.runtime
                .symlink(&target, &dest)
                .map_err(|e| match io_error_kind(&e) {
                    Some(ErrorKind::AlreadyExists) => SpmError::LinkCollision {
                        dest: dest.clone(),
                        owner: None,
                    },
                    Some(ErrorKind::PermissionDenied) => SpmError::LinkPermission {
                        path: dest.clone(),
                        reason: format!("{:#}", e),
                    },
                    _ => SpmError::io("failed to create link", &dest, e),
                })?;

            cleanup.add_link(dest.clone());
            created.push(dest);
        }

        debug!(
            "Linked {} file(s) under {:?}",
            created.len(),
            Self::package_dir(category_root, name)
        );
        Ok(created)
    }

    fn create_dir(&self, dir: &Path) -> Result<(), SpmError> {
        self.runtime.create_dir_all(dir).map_err(|e| {
            if io_error_kind(&e) == Some(ErrorKind::PermissionDenied) {
                SpmError::LinkPermission {
                    path: dir.to_path_buf(),
                    reason: format!("{:#}", e),
                }
            } else {
                SpmError::io("failed to create directory", dir, e)
            }
        })
    }
}
