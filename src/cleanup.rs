//! Rollback list for an install in progress.
//!
//! Every path an install creates is registered here as it is created. If the
//! install aborts, [`CleanupContext::cleanup`] undoes them newest-first so
//! links go before the folders that hold them.

use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, occupied};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupItem {
    /// A symlink created by the install
    Link(PathBuf),
    /// A folder created by the install; removed only if empty
    Dir(PathBuf),
    /// A fetched source tree; removed recursively
    Tree(PathBuf),
}

impl CleanupItem {
    pub fn path(&self) -> &Path {
        match self {
            CleanupItem::Link(p) | CleanupItem::Dir(p) | CleanupItem::Tree(p) => p,
        }
    }
}

/// Tracks paths that must be removed if the operation does not complete
#[derive(Debug, Default)]
pub struct CleanupContext {
    items: Vec<CleanupItem>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&mut self, path: PathBuf) {
        self.items.push(CleanupItem::Link(path));
    }

    pub fn add_dir(&mut self, path: PathBuf) {
        self.items.push(CleanupItem::Dir(path));
    }

    pub fn add_tree(&mut self, path: PathBuf) {
        self.items.push(CleanupItem::Tree(path));
    }

    pub fn items(&self) -> &[CleanupItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove everything registered, newest first.
    ///
    /// Returns the paths that could not be removed. An empty result means the
    /// filesystem is back to its state before the operation started.
    pub fn cleanup<R: Runtime>(&self, runtime: &R) -> Vec<PathBuf> {
        let mut orphaned = Vec::new();

        for item in self.items.iter().rev() {
            let path = item.path();
            if !occupied(runtime, path) {
                continue;
            }
            debug!("Cleaning up: {:?}", path);

            let result = match item {
                CleanupItem::Link(p) => runtime.remove_symlink(p),
                CleanupItem::Dir(p) => runtime.remove_dir(p),
                CleanupItem::Tree(p) => runtime.remove_dir_all(p),
            };
            if let Err(e) = result {
                warn!("Failed to clean up {:?}: {:#}", path, e);
                orphaned.push(path.to_path_buf());
            }
        }

        orphaned
    }
}
