use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the package lifecycle.
///
/// Every variant carries the package name, path or reference needed to act on
/// it, and maps to its own process exit status through [`SpmError::exit_code`].
#[derive(Error, Debug)]
pub enum SpmError {
    #[error("manifest not found at {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("manifest {} is malformed: {reason}", path.display())]
    ManifestMalformed { path: PathBuf, reason: String },

    #[error("invalid manifest entry '{entry}': {reason}")]
    InvalidManifestEntry { entry: String, reason: String },

    #[error("source directory {} does not exist", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("unsupported source type '{extension}' for {reference} (only git is supported)")]
    UnsupportedSourceType { reference: String, extension: String },

    #[error("failed to fetch {reference}: {reason}")]
    FetchFailed { reference: String, reason: String },

    #[error("cannot derive a valid package name from '{reference}': {reason}")]
    InvalidPackageName { reference: String, reason: String },

    #[error("no usable host configuration: {reason}")]
    NoHostConfig { reason: String },

    #[error("cannot link {}: destination already exists{}", dest.display(), owner_suffix(owner))]
    LinkCollision {
        dest: PathBuf,
        owner: Option<String>,
    },

    #[error("cannot link {}: target {} does not exist", dest.display(), target.display())]
    LinkTargetMissing { dest: PathBuf, target: PathBuf },

    #[error("permission denied while linking {}: {reason}", path.display())]
    LinkPermission { path: PathBuf, reason: String },

    #[error(
        "timed out after {}s waiting for the ledger lock {}",
        timeout.as_secs(),
        path.display()
    )]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("failed to remove {} for package {name}: {reason}", path.display())]
    RemoveFailed {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("ledger {} is corrupt: {reason}", path.display())]
    LedgerCorrupt { path: PathBuf, reason: String },

    #[error(
        "partial install of {name}: {cause}; could not clean up {}",
        display_paths(orphaned)
    )]
    PartialInstall {
        name: String,
        cause: Box<SpmError>,
        orphaned: Vec<PathBuf>,
    },

    #[error("{action} {}: {reason}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl SpmError {
    /// Process exit status for this failure. Each kind has its own code so
    /// scripts can branch on it; 2 is left to clap for usage errors and 3 to
    /// the "installed from a different source" refusal.
    pub fn exit_code(&self) -> u8 {
        match self {
            SpmError::ManifestNotFound { .. } => 10,
            SpmError::ManifestMalformed { .. } => 11,
            SpmError::SourceNotFound { .. } => 12,
            SpmError::UnsupportedSourceType { .. } => 13,
            SpmError::FetchFailed { .. } => 14,
            SpmError::NoHostConfig { .. } => 15,
            SpmError::LinkCollision { .. } => 16,
            SpmError::LinkTargetMissing { .. } => 17,
            SpmError::LinkPermission { .. } => 18,
            SpmError::LockTimeout { .. } => 19,
            SpmError::InvalidPackageName { .. } => 20,
            SpmError::InvalidManifestEntry { .. } => 21,
            SpmError::PartialInstall { .. } => 22,
            SpmError::RemoveFailed { .. } => 23,
            SpmError::LedgerCorrupt { .. } => 24,
            SpmError::Io { .. } => 25,
        }
    }

    /// Wrap an anyhow error from the runtime layer, keeping the full context chain.
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        SpmError::Io {
            action,
            path: path.into(),
            reason: format!("{:#}", err),
        }
    }
}

fn owner_suffix(owner: &Option<String>) -> String {
    match owner {
        Some(name) => format!(" (owned by package {})", name),
        None => String::new(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
