//! Destination roots for each content category, derived from the Salt host
//! configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::config::Config;
use crate::error::SpmError;
use crate::manifest::Category;
use crate::runtime::Runtime;

/// Salt's built-in `file_roots: {base: [/srv/salt]}`
pub const DEFAULT_FILE_ROOT: &str = "/srv/salt";
/// Salt's built-in `pillar_roots: {base: [/srv/pillar]}`
pub const DEFAULT_PILLAR_ROOT: &str = "/srv/pillar";

/// The subset of a master/minion configuration this tool reads.
#[derive(Deserialize, Default, Debug)]
struct HostConfig {
    file_roots: Option<BTreeMap<String, Option<Vec<PathBuf>>>>,
    pillar_roots: Option<BTreeMap<String, Option<Vec<PathBuf>>>>,
}

fn first_base_root(
    roots: Option<BTreeMap<String, Option<Vec<PathBuf>>>>,
    default: &str,
) -> PathBuf {
    roots
        .and_then(|mut envs| envs.remove("base"))
        .flatten()
        .and_then(|dirs| dirs.into_iter().next())
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Destination root per category.
///
/// Most categories live in a `_<category>` folder under the file root.
/// Formulas go in the file root itself and pillar data in the pillar root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRoots {
    file_root: PathBuf,
    pillar_root: PathBuf,
}

impl CategoryRoots {
    pub fn new(file_root: impl Into<PathBuf>, pillar_root: impl Into<PathBuf>) -> Self {
        Self {
            file_root: file_root.into(),
            pillar_root: pillar_root.into(),
        }
    }

    pub fn file_root(&self) -> &Path {
        &self.file_root
    }

    pub fn pillar_root(&self) -> &Path {
        &self.pillar_root
    }

    pub fn root(&self, category: Category) -> PathBuf {
        match category {
            Category::Modules => self.file_root.join("_modules"),
            Category::States => self.file_root.join("_states"),
            Category::Runners => self.file_root.join("_runners"),
            Category::Grains => self.file_root.join("_grains"),
            Category::Formulas => self.file_root.clone(),
            Category::Pillar => self.pillar_root.clone(),
        }
    }

    /// `(category, root)` pairs in install order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, PathBuf)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.root(c)))
    }
}

impl Default for CategoryRoots {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_ROOT, DEFAULT_PILLAR_ROOT)
    }
}

/// Reads the master configuration if present, else the minion configuration,
/// else falls back to Salt's defaults.
pub struct CategoryRootResolver<'a, R: Runtime> {
    runtime: &'a R,
    master_config: PathBuf,
    minion_config: PathBuf,
}

impl<'a, R: Runtime> CategoryRootResolver<'a, R> {
    pub fn new(runtime: &'a R, config: &Config) -> Self {
        Self {
            runtime,
            master_config: config.master_config.clone(),
            minion_config: config.minion_config.clone(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn resolve_roots(&self) -> Result<CategoryRoots, SpmError> {
        let source = [&self.master_config, &self.minion_config]
            .into_iter()
            .find(|path| self.runtime.exists(path));

        let host = match source {
            Some(path) => {
                debug!("Reading host configuration from {:?}", path);
                self.load(path)?
            }
            None => {
                debug!(
                    "Neither {:?} nor {:?} exists, using Salt defaults",
                    self.master_config, self.minion_config
                );
                HostConfig::default()
            }
        };

        let roots = CategoryRoots::new(
            first_base_root(host.file_roots, DEFAULT_FILE_ROOT),
            first_base_root(host.pillar_roots, DEFAULT_PILLAR_ROOT),
        );
        info!(
            "Category roots: file root {:?}, pillar root {:?}",
            roots.file_root, roots.pillar_root
        );
        Ok(roots)
    }

    fn load(&self, path: &Path) -> Result<HostConfig, SpmError> {
        let content = self
            .runtime
            .read_to_string(path)
            .map_err(|e| SpmError::NoHostConfig {
                reason: format!("{:#}", e),
            })?;

        if content.trim().is_empty() {
            return Ok(HostConfig::default());
        }
        serde_yaml::from_str(&content).map_err(|e| SpmError::NoHostConfig {
            reason: format!("{:?} is not a valid configuration: {}", path, e),
        })
    }
}
