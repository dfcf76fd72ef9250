//! Remove flow.

use std::io::ErrorKind;
use std::path::Path;

use log::{debug, info};

use super::{Outcome, PackageLifecycleEngine};
use crate::error::SpmError;
use crate::link::LinkFarmBuilder;
use crate::runtime::{Runtime, io_error_kind};
use crate::source::{Fetcher, PackageName};

impl<'a, R: Runtime, F: Fetcher> PackageLifecycleEngine<'a, R, F> {
    /// Remove an installed package: its recorded links, its per-category
    /// folders, its fetched tree, then its ledger entry.
    ///
    /// A failure before the ledger write leaves the entry in place so the
    /// removal can be retried.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<Outcome, SpmError> {
        self.initialize()?;
        let _lock = self.lock().await?;

        let Some(entry) = self.ledger.load()?.remove(name) else {
            info!("{} is not installed", name);
            return Ok(Outcome::NotInstalled {
                name: name.to_string(),
            });
        };
        // Ledger keys come from validated names unless the file was edited by hand
        let name = PackageName::new(name)?;
        let roots = self.roots.resolve_roots()?;

        for path in &entry.links {
            self.remove_path(&name, path)?;
        }

        for (category, root) in roots.iter() {
            let dir = LinkFarmBuilder::<R>::package_dir(&root, name.as_str());
            debug!("Removing {} folder {:?}", category, dir);
            self.remove_path(&name, &dir)?;
        }
        self.remove_path(&name, &self.config.pkgs_dir().join(name.as_str()))?;

        self.ledger.remove(name.as_str())?;
        info!("Removed {} ({} link(s))", name, entry.links.len());
        Ok(Outcome::Removed {
            name: name.to_string(),
            entry,
        })
    }

    /// Delete a link, file or folder tree. Absent paths are skipped; links
    /// are removed without following them.
    fn remove_path(&self, name: &PackageName, path: &Path) -> Result<(), SpmError> {
        let result = if self.runtime.is_symlink(path) {
            self.runtime.remove_symlink(path)
        } else if self.runtime.is_dir(path) {
            self.runtime.remove_dir_all(path)
        } else if self.runtime.exists(path) {
            self.runtime.remove_file(path)
        } else {
            debug!("{:?} is already gone", path);
            return Ok(());
        };

        match result {
            Ok(()) => {
                debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if io_error_kind(&e) == Some(ErrorKind::NotFound) => Ok(()),
            Err(e) => Err(SpmError::RemoveFailed {
                name: name.to_string(),
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            }),
        }
    }
}
