//! Fetch collaborator: materializes a remote package tree on local disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Materialize the tree behind `locator` at `dest`, which does not exist yet.
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<()>;
}

/// Clones git repositories with the `git` program.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: PathBuf,
}

impl GitFetcher {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `git+https://host/repo.git` -> `https://host/repo.git`
    pub fn clone_url(locator: &str) -> &str {
        locator.strip_prefix("git+").unwrap_or(locator)
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<()> {
        let url = Self::clone_url(locator);
        debug!("Running {:?} clone {} {:?}", self.program, url, dest);

        let output = Command::new(&self.program)
            .arg("clone")
            .arg("--quiet")
            .arg("--")
            .arg(url)
            .arg(dest)
            .output()
            .await
            .with_context(|| format!("Failed to run {:?}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}
