//! Package sources: naming a package from its reference and producing a
//! local source tree for it.
//!
//! A reference is either a remote locator (`https://host/org/mypkg.git`,
//! `git+repo/mypkg.git`) fetched into the package store, or, in develop mode,
//! a local directory used in place.

pub mod fetch;

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::SpmError;
use crate::runtime::Runtime;

pub use fetch::{Fetcher, GitFetcher};

#[cfg(test)]
pub use fetch::MockFetcher;

/// Salt's own synced-module directories under the file root. A package with
/// one of these names would put its formula folder on top of them.
const RESERVED_NAMES: [&str; 4] = ["_modules", "_states", "_runners", "_grains"];

/// Installed name of a package, derived from its source reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName(String);

impl PackageName {
    /// Final path segment of the reference with its last extension stripped:
    /// `git+repo/mypkg.git` -> `mypkg`, `/home/me/mypkg/` -> `mypkg`.
    pub fn from_reference(reference: &str) -> Result<Self, SpmError> {
        let segment = last_segment(reference);
        let name = match segment.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => segment,
        };
        Self::validate(reference, name)
    }

    /// Accept `name` as-is if it is safe to join onto a category root.
    pub fn new(name: &str) -> Result<Self, SpmError> {
        Self::validate(name, name)
    }

    fn validate(reference: &str, name: &str) -> Result<Self, SpmError> {
        let invalid = |reason: &str| SpmError::InvalidPackageName {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() || name == "." || name == ".." {
            return Err(invalid("name is empty"));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(invalid("name contains a path separator"));
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(invalid("name is reserved by the Salt file root"));
        }

        Ok(PackageName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How a remote reference is materialized locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Git,
}

impl FetchMethod {
    /// Pick the method from the extension after the last dot of the final segment.
    pub fn from_reference(reference: &str) -> Result<Self, SpmError> {
        let extension = last_segment(reference)
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default();

        match extension {
            "git" => Ok(FetchMethod::Git),
            other => Err(SpmError::UnsupportedSourceType {
                reference: reference.to_string(),
                extension: other.to_string(),
            }),
        }
    }
}

fn last_segment(reference: &str) -> &str {
    let trimmed = reference.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// A source tree ready to link from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Absolute root of the tree
    pub root: PathBuf,
    /// True if the tree was fetched into the package store by this call
    pub fetched: bool,
}

/// Turns a reference into a local source tree.
pub struct SourceResolver<'a, R: Runtime, F: Fetcher> {
    runtime: &'a R,
    fetcher: &'a F,
    pkgs_dir: PathBuf,
}

impl<'a, R: Runtime, F: Fetcher> SourceResolver<'a, R, F> {
    pub fn new(runtime: &'a R, fetcher: &'a F, pkgs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            fetcher,
            pkgs_dir: pkgs_dir.into(),
        }
    }

    /// Where a fetched package lives: `<pkgs_dir>/<name>`
    pub fn store_dir(&self, name: &PackageName) -> PathBuf {
        self.pkgs_dir.join(name.as_str())
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, reference: &str, develop: bool) -> Result<ResolvedSource, SpmError> {
        if develop {
            return self.resolve_local(Path::new(reference));
        }

        let name = PackageName::from_reference(reference)?;
        match FetchMethod::from_reference(reference)? {
            FetchMethod::Git => {}
        }

        let dest = self.store_dir(&name);
        if self.runtime.exists(&dest) {
            // Not in the ledger, so this is debris from an aborted install
            warn!("Removing stale package store directory {:?}", dest);
            self.runtime
                .remove_dir_all(&dest)
                .map_err(|e| SpmError::io("failed to clear stale source tree", &dest, e))?;
        }
        self.runtime
            .create_dir_all(&self.pkgs_dir)
            .map_err(|e| SpmError::io("failed to create package store", &self.pkgs_dir, e))?;

        info!("Fetching {} into {:?}", reference, dest);
        self.fetcher
            .fetch(reference, &dest)
            .await
            .map_err(|e| SpmError::FetchFailed {
                reference: reference.to_string(),
                reason: format!("{:#}", e),
            })?;

        Ok(ResolvedSource {
            root: dest,
            fetched: true,
        })
    }

    fn resolve_local(&self, path: &Path) -> Result<ResolvedSource, SpmError> {
        if !self.runtime.is_dir(path) {
            return Err(SpmError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }
        // Links must point at absolute targets
        let root = self
            .runtime
            .canonicalize(path)
            .map_err(|e| SpmError::io("failed to resolve source directory", path, e))?;
        debug!("Using local source tree {:?}", root);

        Ok(ResolvedSource {
            root,
            fetched: false,
        })
    }
}
