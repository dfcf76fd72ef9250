//! Package manifest: which files of a source tree belong to which category.

use std::fmt;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SpmError;
use crate::runtime::{Runtime, io_error_kind};

/// Name of the descriptor at the root of every package source tree.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// The fixed set of content kinds a package can ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Modules,
    States,
    Runners,
    Grains,
    Formulas,
    Pillar,
}

impl Category {
    /// All categories, in install order.
    pub const ALL: [Category; 6] = [
        Category::Modules,
        Category::States,
        Category::Runners,
        Category::Grains,
        Category::Formulas,
        Category::Pillar,
    ];

    /// Key used in the manifest.
    pub fn key(self) -> &'static str {
        match self {
            Category::Modules => "modules",
            Category::States => "states",
            Category::Runners => "runners",
            Category::Grains => "grains",
            Category::Formulas => "formulas",
            Category::Pillar => "pillar",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// On-disk shape. A key written with no value (`states:`) parses as null.
#[derive(Deserialize, Default)]
struct RawManifest {
    modules: Option<Vec<String>>,
    states: Option<Vec<String>>,
    runners: Option<Vec<String>>,
    grains: Option<Vec<String>>,
    formulas: Option<Vec<String>>,
    pillar: Option<Vec<String>>,
}

/// Relative file lists per category, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub modules: Vec<String>,
    pub states: Vec<String>,
    pub runners: Vec<String>,
    pub grains: Vec<String>,
    pub formulas: Vec<String>,
    pub pillar: Vec<String>,
}

impl From<RawManifest> for Manifest {
    fn from(raw: RawManifest) -> Self {
        Manifest {
            modules: raw.modules.unwrap_or_default(),
            states: raw.states.unwrap_or_default(),
            runners: raw.runners.unwrap_or_default(),
            grains: raw.grains.unwrap_or_default(),
            formulas: raw.formulas.unwrap_or_default(),
            pillar: raw.pillar.unwrap_or_default(),
        }
    }
}

impl Manifest {
    /// Parse manifest text. Unknown keys are ignored; blank input is an empty manifest.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Manifest::default());
        }
        let raw: RawManifest = serde_yaml::from_str(content)?;
        Ok(raw.into())
    }

    pub fn files(&self, category: Category) -> &[String] {
        match category {
            Category::Modules => &self.modules,
            Category::States => &self.states,
            Category::Runners => &self.runners,
            Category::Grains => &self.grains,
            Category::Formulas => &self.formulas,
            Category::Pillar => &self.pillar,
        }
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.files(*c).is_empty())
    }
}

/// Reads the `MANIFEST` of a source tree.
pub struct ManifestReader<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> ManifestReader<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }

    /// Path of the manifest inside a source tree.
    pub fn manifest_path(source_root: &Path) -> std::path::PathBuf {
        source_root.join(MANIFEST_FILE)
    }

    #[tracing::instrument(skip(self))]
    pub fn read(&self, path: &Path) -> Result<Manifest, SpmError> {
        let content = self.runtime.read_to_string(path).map_err(|e| {
            if io_error_kind(&e) == Some(std::io::ErrorKind::NotFound) {
                SpmError::ManifestNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SpmError::io("failed to read manifest", path, e)
            }
        })?;

        let manifest = Manifest::parse(&content).map_err(|e| SpmError::ManifestMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!("Read manifest {:?}: {:?}", path, manifest);
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    #[test]
    fn test_parse_all_categories() {
        let manifest = Manifest::parse(
            "modules: [foo.py]\nstates: [web.py]\nrunners: [run.py]\n\
             grains: [os.py]\nformulas: [nginx]\npillar: [bar.sls]\n",
        )
        .unwrap();

        assert_eq!(manifest.files(Category::Modules), ["foo.py"]);
        assert_eq!(manifest.files(Category::States), ["web.py"]);
        assert_eq!(manifest.files(Category::Runners), ["run.py"]);
        assert_eq!(manifest.files(Category::Grains), ["os.py"]);
        assert_eq!(manifest.files(Category::Formulas), ["nginx"]);
        assert_eq!(manifest.files(Category::Pillar), ["bar.sls"]);
    }

    #[test]
    fn test_parse_missing_and_null_keys_are_empty() {
        let manifest = Manifest::parse("modules:\n  - foo.py\n  - lib/bar.py\nstates:\n").unwrap();

        assert_eq!(manifest.modules, vec!["foo.py", "lib/bar.py"]);
        assert!(manifest.states.is_empty());
        assert!(manifest.pillar.is_empty());
        assert!(!manifest.is_empty());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let manifest = Manifest::parse("name: mypkg\nversion: 1\npillar: [bar.sls]\n").unwrap();
        assert_eq!(manifest.pillar, vec!["bar.sls"]);
    }

    #[test]
    fn test_parse_blank_is_empty() {
        assert!(Manifest::parse("").unwrap().is_empty());
        assert!(Manifest::parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_mapping() {
        assert!(Manifest::parse("- foo.py\n- bar.py\n").is_err());
        assert!(Manifest::parse("just a string").is_err());
        assert!(Manifest::parse("modules: foo.py\n").is_err());
    }

    #[test]
    fn test_category_order_and_keys() {
        let keys: Vec<_> = Category::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(
            keys,
            ["modules", "states", "runners", "grains", "formulas", "pillar"]
        );
        assert_eq!(Category::Pillar.to_string(), "pillar");
    }

    #[test]
    fn test_read_manifest() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/src/mypkg/MANIFEST");

        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| Ok("modules: [foo.py]\npillar: [bar.sls]\n".into()));

        let manifest = ManifestReader::new(&runtime).read(&path).unwrap();
        assert_eq!(manifest.modules, vec!["foo.py"]);
        assert_eq!(manifest.pillar, vec!["bar.sls"]);
    }

    #[test]
    fn test_read_manifest_not_found() {
        let mut runtime = MockRuntime::new();
        runtime.expect_read_to_string().returning(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not found").into())
        });

        let err = ManifestReader::new(&runtime)
            .read(Path::new("/src/mypkg/MANIFEST"))
            .unwrap_err();
        assert!(matches!(err, SpmError::ManifestNotFound { .. }));
    }

    #[test]
    fn test_read_manifest_malformed() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("modules: [unclosed\n".into()));

        let err = ManifestReader::new(&runtime)
            .read(Path::new("/src/mypkg/MANIFEST"))
            .unwrap_err();
        assert!(matches!(err, SpmError::ManifestMalformed { .. }));
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            ManifestReader::<MockRuntime>::manifest_path(Path::new("/src/mypkg")),
            PathBuf::from("/src/mypkg/MANIFEST")
        );
    }
}
