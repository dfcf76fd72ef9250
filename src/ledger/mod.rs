//! Installed-package ledger.
//!
//! A single YAML document maps each installed package to the reference it
//! was installed from and the links its install created:
//!
//! ```yaml
//! mypkg:
//!   url: git+repo/mypkg.git
//!   files:
//!   - /srv/salt/_modules/mypkg/foo.py
//!   - /srv/pillar/mypkg/bar.sls
//! ```

pub mod lock;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SpmError;
use crate::runtime::Runtime;

pub use lock::LedgerLock;

/// What one install created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Reference the package was installed from
    #[serde(rename = "url")]
    pub source: String,
    /// Links created by the install, in creation order
    #[serde(rename = "files", default)]
    pub links: Vec<PathBuf>,
}

/// Installed packages in insertion order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Ledger {
    entries: IndexMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn get(&self, name: &str) -> Option<&LedgerEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: LedgerEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Remove an entry, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<LedgerEntry> {
        self.entries.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Package that recorded `path` among its links, if any.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        self.iter()
            .find(|(_, entry)| entry.links.iter().any(|l| l == path))
            .map(|(name, _)| name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persistent store for the [`Ledger`].
///
/// Mutations re-read the file before writing, so callers holding the
/// [`LedgerLock`] always modify the latest state.
pub struct InstalledLedger<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
}

impl<'a, R: Runtime> InstalledLedger<'a, R> {
    pub fn new(runtime: &'a R, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty ledger file if there is none.
    pub fn ensure_exists(&self) -> Result<(), SpmError> {
        if !self.runtime.exists(&self.path) {
            debug!("Creating empty ledger {:?}", self.path);
            self.runtime
                .write(&self.path, b"")
                .map_err(|e| SpmError::io("failed to create ledger", &self.path, e))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<Ledger, SpmError> {
        if !self.runtime.exists(&self.path) {
            return Ok(Ledger::default());
        }
        let content = self
            .runtime
            .read_to_string(&self.path)
            .map_err(|e| SpmError::io("failed to read ledger", &self.path, e))?;

        // An empty document is YAML null
        let ledger: Option<Ledger> = if content.trim().is_empty() {
            None
        } else {
            serde_yaml::from_str(&content).map_err(|e| SpmError::LedgerCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        };
        Ok(ledger.unwrap_or_default())
    }

    /// Replace the ledger file atomically: write a sibling temp file, then
    /// rename it over the original.
    #[tracing::instrument(skip(self, ledger))]
    pub fn save(&self, ledger: &Ledger) -> Result<(), SpmError> {
        let content = serde_yaml::to_string(ledger).map_err(|e| SpmError::LedgerCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = self.temp_path();
        self.runtime
            .write(&tmp, content.as_bytes())
            .map_err(|e| SpmError::io("failed to write ledger", &tmp, e))?;
        self.runtime
            .rename(&tmp, &self.path)
            .map_err(|e| SpmError::io("failed to replace ledger", &self.path, e))?;

        debug!("Saved ledger with {} package(s)", ledger.len());
        Ok(())
    }

    pub fn has(&self, name: &str) -> Result<bool, SpmError> {
        Ok(self.load()?.contains(name))
    }

    pub fn upsert(&self, name: &str, entry: LedgerEntry) -> Result<(), SpmError> {
        let mut ledger = self.load()?;
        ledger.insert(name, entry);
        self.save(&ledger)
    }

    /// Drop an entry. Returns the removed entry, or `None` if it was absent
    /// (in which case the file is left untouched).
    pub fn remove(&self, name: &str) -> Result<Option<LedgerEntry>, SpmError> {
        let mut ledger = self.load()?;
        let removed = ledger.remove(name);
        if removed.is_some() {
            self.save(&ledger)?;
        }
        Ok(removed)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
