//! Package lifecycle engine - install, remove and list.
//!
//! The engine coordinates:
//! - Source resolution (fetch or develop-mode local tree)
//! - Manifest reading
//! - Category root resolution from the Salt host configuration
//! - Link farm construction, with rollback on failure
//! - Ledger persistence under the advisory lock

mod install;
mod remove;

use std::fmt;

use log::debug;

use crate::config::{CLIENT_CONFIG, Config};
use crate::error::SpmError;
use crate::host::CategoryRootResolver;
use crate::ledger::{InstalledLedger, LedgerEntry, LedgerLock};
use crate::link::LinkFarmBuilder;
use crate::manifest::ManifestReader;
use crate::runtime::Runtime;
use crate::source::{Fetcher, SourceResolver};

pub use install::InstallOptions;

/// Result of a lifecycle call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed {
        name: String,
        entry: LedgerEntry,
    },
    Removed {
        name: String,
        entry: LedgerEntry,
    },
    /// Same name and same source already in the ledger
    AlreadyInstalled { name: String },
    /// Name not in the ledger
    NotInstalled { name: String },
    /// Same name in the ledger but from another source; nothing was changed
    InstalledFromDifferentSource {
        name: String,
        installed: String,
        requested: String,
    },
}

impl Outcome {
    /// 3 for a refusal, 0 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::InstalledFromDifferentSource { .. } => 3,
            _ => 0,
        }
    }

    /// True if the call left the filesystem and ledger untouched.
    pub fn is_noop(&self) -> bool {
        !matches!(self, Outcome::Installed { .. } | Outcome::Removed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Installed { name, entry } => {
                write!(f, "Installed {} ({} link(s))", name, entry.links.len())
            }
            Outcome::Removed { name, entry } => {
                write!(f, "Removed {} ({} link(s))", name, entry.links.len())
            }
            Outcome::AlreadyInstalled { name } => write!(f, "{} is already installed", name),
            Outcome::NotInstalled { name } => write!(f, "{} is not installed", name),
            Outcome::InstalledFromDifferentSource {
                name,
                installed,
                requested,
            } => write!(
                f,
                "{} is already installed from {}; remove it before installing from {}",
                name, installed, requested
            ),
        }
    }
}

pub struct PackageLifecycleEngine<'a, R: Runtime, F: Fetcher> {
    runtime: &'a R,
    config: &'a Config,
    sources: SourceResolver<'a, R, F>,
    roots: CategoryRootResolver<'a, R>,
    manifests: ManifestReader<'a, R>,
    links: LinkFarmBuilder<'a, R>,
    ledger: InstalledLedger<'a, R>,
}

impl<'a, R: Runtime, F: Fetcher> PackageLifecycleEngine<'a, R, F> {
    pub fn new(runtime: &'a R, fetcher: &'a F, config: &'a Config) -> Self {
        Self {
            runtime,
            config,
            sources: SourceResolver::new(runtime, fetcher, config.pkgs_dir()),
            roots: CategoryRootResolver::new(runtime, config),
            manifests: ManifestReader::new(runtime),
            links: LinkFarmBuilder::new(runtime),
            ledger: InstalledLedger::new(runtime, config.installed_path()),
        }
    }

    /// Create the storage layout if missing: the spm folder, the package
    /// store, the local client configuration and an empty ledger.
    /// Existing files are never overwritten.
    pub fn initialize(&self) -> Result<(), SpmError> {
        for dir in [self.config.spm_dir().to_path_buf(), self.config.pkgs_dir()] {
            self.runtime
                .create_dir_all(&dir)
                .map_err(|e| SpmError::io("failed to create directory", &dir, e))?;
        }

        let client = self.config.client_path();
        if !self.runtime.exists(&client) {
            debug!("Writing client configuration {:?}", client);
            self.runtime
                .write(&client, CLIENT_CONFIG.as_bytes())
                .map_err(|e| SpmError::io("failed to write client configuration", &client, e))?;
        }

        self.ledger.ensure_exists()
    }

    /// Installed package names in the order they were installed.
    pub fn list(&self) -> Result<Vec<String>, SpmError> {
        Ok(self.ledger.load()?.names().map(str::to_string).collect())
    }

    async fn lock(&self) -> Result<LedgerLock, SpmError> {
        LedgerLock::acquire(&self.config.lock_path(), self.config.lock_timeout).await
    }
}
