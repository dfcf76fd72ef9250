//! Install flow.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::{Outcome, PackageLifecycleEngine};
use crate::cleanup::CleanupContext;
use crate::error::SpmError;
use crate::host::CategoryRoots;
use crate::ledger::{Ledger, LedgerEntry};
use crate::manifest::{Manifest, ManifestReader};
use crate::runtime::Runtime;
use crate::source::{Fetcher, PackageName};

/// Options for the install use case
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Link from the reference as a local directory instead of fetching it
    pub develop: bool,
}

impl<'a, R: Runtime, F: Fetcher> PackageLifecycleEngine<'a, R, F> {
    /// Install a package from `reference`.
    ///
    /// Holds the ledger lock from the ledger check through the final write.
    /// A failure after the source is resolved rolls back everything this
    /// call created and leaves the ledger untouched.
    #[tracing::instrument(skip(self))]
    pub async fn install(
        &self,
        reference: &str,
        options: &InstallOptions,
    ) -> Result<Outcome, SpmError> {
        self.initialize()?;
        let name = PackageName::from_reference(reference)?;
        let _lock = self.lock().await?;

        let ledger = self.ledger.load()?;
        if let Some(existing) = ledger.get(name.as_str()) {
            if existing.source == reference {
                info!("{} is already installed from {}", name, reference);
                return Ok(Outcome::AlreadyInstalled {
                    name: name.to_string(),
                });
            }
            warn!(
                "{} is installed from {}, refusing to install from {}",
                name, existing.source, reference
            );
            return Ok(Outcome::InstalledFromDifferentSource {
                name: name.to_string(),
                installed: existing.source.clone(),
                requested: reference.to_string(),
            });
        }

        let mut cleanup = CleanupContext::new();
        let result = match self
            .place_files(&name, reference, options, &ledger, &mut cleanup)
            .await
        {
            Ok(links) => {
                let entry = LedgerEntry {
                    source: reference.to_string(),
                    links,
                };
                self.ledger
                    .upsert(name.as_str(), entry.clone())
                    .map(|()| entry)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(entry) => {
                info!("Installed {} with {} link(s)", name, entry.links.len());
                Ok(Outcome::Installed {
                    name: name.to_string(),
                    entry,
                })
            }
            Err(cause) => Err(self.roll_back(&name, &cleanup, cause)),
        }
    }

    /// Resolve the source, plan every link, then create them. Returns the
    /// created links in category order.
    async fn place_files(
        &self,
        name: &PackageName,
        reference: &str,
        options: &InstallOptions,
        ledger: &Ledger,
        cleanup: &mut CleanupContext,
    ) -> Result<Vec<PathBuf>, SpmError> {
        if !options.develop {
            // Registered before fetching so a half-written clone is removed too
            cleanup.add_tree(self.sources.store_dir(name));
        }
        let source = self.sources.resolve(reference, options.develop).await?;

        let roots = self.roots.resolve_roots()?;
        let manifest = self
            .manifests
            .read(&ManifestReader::<R>::manifest_path(&source.root))?;
        if manifest.is_empty() {
            warn!("Manifest of {} lists no files", name);
        }

        self.check_links(name, &source.root, &roots, &manifest, ledger)?;

        let mut created = Vec::new();
        for (category, root) in roots.iter() {
            let files = manifest.files(category);
            debug!("Linking {} {} file(s) of {}", files.len(), category, name);
            created.extend(
                self.links
                    .link(&root, name.as_str(), &source.root, files, cleanup)?,
            );
        }
        Ok(created)
    }

    /// Fail before anything is linked if a destination is taken, either on
    /// disk, twice within this package, or by another installed package.
    fn check_links(
        &self,
        name: &PackageName,
        source_root: &Path,
        roots: &CategoryRoots,
        manifest: &Manifest,
        ledger: &Ledger,
    ) -> Result<(), SpmError> {
        let with_owner = |dest: PathBuf| SpmError::LinkCollision {
            owner: ledger.owner_of(&dest).map(str::to_string),
            dest,
        };

        let mut claimed = HashSet::new();
        for (category, root) in roots.iter() {
            let planned = self
                .links
                .plan(
                    &root,
                    name.as_str(),
                    source_root,
                    manifest.files(category),
                    &mut claimed,
                )
                .map_err(|e| match e {
                    SpmError::LinkCollision { dest, owner: None } => with_owner(dest),
                    other => other,
                })?;

            if let Some(link) = planned.iter().find(|l| ledger.owner_of(&l.dest).is_some()) {
                return Err(with_owner(link.dest.clone()));
            }
        }
        Ok(())
    }

    fn roll_back(&self, name: &PackageName, cleanup: &CleanupContext, cause: SpmError) -> SpmError {
        warn!("Install of {} failed, rolling back: {}", name, cause);
        let orphaned = cleanup.cleanup(self.runtime);
        if orphaned.is_empty() {
            cause
        } else {
            SpmError::PartialInstall {
                name: name.to_string(),
                cause: Box::new(cause),
                orphaned,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::ledger::InstalledLedger;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::source::MockFetcher;
    use std::fs;

    const MYPKG_MANIFEST: &str = "modules:\n  - foo.py\npillar:\n  - bar.sls\n";

    fn fetcher_writing(manifest: &'static str, files: &'static [&'static str]) -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(move |_, dest| {
            Fixture::write_tree(dest, manifest, files);
            Ok(())
        });
        fetcher
    }

    fn develop() -> InstallOptions {
        InstallOptions { develop: true }
    }

    fn ledger(fx: &Fixture) -> Ledger {
        InstalledLedger::new(&RealRuntime, fx.config.installed_path())
            .load()
            .unwrap()
    }

    #[tokio::test]
    async fn test_install_fetched_package() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = fetcher_writing(MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let outcome = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap();

        let foo = fx.file_root().join("_modules/mypkg/foo.py");
        let bar = fx.pillar_root().join("mypkg/bar.sls");
        let expected = LedgerEntry {
            source: "git+repo/mypkg.git".into(),
            links: vec![foo.clone(), bar.clone()],
        };
        assert_eq!(
            outcome,
            Outcome::Installed {
                name: "mypkg".into(),
                entry: expected.clone()
            }
        );
        assert_eq!(ledger(&fx).get("mypkg"), Some(&expected));

        let store = fx.config.pkgs_dir().join("mypkg");
        assert_eq!(fs::read_link(&foo).unwrap(), store.join("foo.py"));
        assert_eq!(fs::read_link(&bar).unwrap(), store.join("bar.sls"));
        // Every category gets its package folder, even without files
        assert!(fx.file_root().join("_states/mypkg").is_dir());
        assert!(fx.file_root().join("mypkg").is_dir());
    }

    #[tokio::test]
    async fn test_install_develop_links_into_local_tree() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package(
            "webapp",
            "states:\n  - states/web.sls\nformulas:\n  - webapp\n",
            &["states/web.sls", "webapp/init.sls"],
        );
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let reference = src.to_str().unwrap();
        engine.install(reference, &develop()).await.unwrap();

        let canonical = fs::canonicalize(&src).unwrap();
        let web = fx.file_root().join("_states/webapp/web.sls");
        let formula = fx.file_root().join("webapp/webapp");
        assert_eq!(fs::read_link(&web).unwrap(), canonical.join("states/web.sls"));
        assert_eq!(fs::read_link(&formula).unwrap(), canonical.join("webapp"));
        assert!(formula.join("init.sls").exists());
        assert_eq!(ledger(&fx).get("webapp").unwrap().source, reference);
        assert!(!fx.config.pkgs_dir().join("webapp").exists());
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = fetcher_writing(MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap();
        let before = fs::read_to_string(fx.config.installed_path()).unwrap();

        let outcome = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::AlreadyInstalled {
                name: "mypkg".into()
            }
        );
        assert_eq!(
            fs::read_to_string(fx.config.installed_path()).unwrap(),
            before
        );
        assert_eq!(engine.list().unwrap(), vec!["mypkg".to_string()]);
    }

    #[tokio::test]
    async fn test_install_refuses_different_source() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_, dest| {
            Fixture::write_tree(dest, MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
            Ok(())
        });
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap();
        let before = fs::read_to_string(fx.config.installed_path()).unwrap();

        let outcome = engine
            .install("https://other.example/mypkg.git", &InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code(), 3);
        assert!(matches!(
            outcome,
            Outcome::InstalledFromDifferentSource { ref installed, .. } if installed == "git+repo/mypkg.git"
        ));
        assert_eq!(
            fs::read_to_string(fx.config.installed_path()).unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_install_missing_categories_link_nothing() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package("grainpkg", "grains:\n  - custom.py\nstates:\n", &["custom.py"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let outcome = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap();

        match outcome {
            Outcome::Installed { entry, .. } => assert_eq!(
                entry.links,
                vec![fx.file_root().join("_grains/grainpkg/custom.py")]
            ),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            fs::read_dir(fx.pillar_root().join("grainpkg")).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_install_missing_manifest_rolls_back_fetch() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_, dest| {
            fs::create_dir_all(dest).unwrap();
            fs::write(dest.join("README"), "no manifest here").unwrap();
            Ok(())
        });
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SpmError::ManifestNotFound { .. }));
        assert!(!fx.config.pkgs_dir().join("mypkg").exists());
        assert!(ledger(&fx).is_empty());
    }

    #[tokio::test]
    async fn test_install_failed_fetch_removes_partial_clone() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_, dest| {
            fs::create_dir_all(dest.join(".git")).unwrap();
            Err(anyhow::anyhow!("connection reset"))
        });
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 14);
        assert!(!fx.config.pkgs_dir().join("mypkg").exists());
    }

    #[tokio::test]
    async fn test_install_missing_target_rolls_back_everything() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        // pillar entry is listed but absent
        let src = fx.local_package("mypkg", MYPKG_MANIFEST, &["foo.py"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap_err();

        assert!(
            matches!(err, SpmError::LinkTargetMissing { ref dest, .. } if dest == &fx.pillar_root().join("mypkg/bar.sls"))
        );
        // Checked up front: nothing was created
        assert!(!fx.file_root().join("_modules/mypkg").exists());
        assert!(!fx.pillar_root().join("mypkg").exists());
        assert!(src.join("foo.py").exists());
        assert!(ledger(&fx).is_empty());
    }

    #[tokio::test]
    async fn test_install_collision_with_existing_file_creates_nothing() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package("mypkg", MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let taken = fx.pillar_root().join("mypkg/bar.sls");
        fs::create_dir_all(taken.parent().unwrap()).unwrap();
        fs::write(&taken, "hand-written pillar").unwrap();
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap_err();

        assert!(
            matches!(err, SpmError::LinkCollision { ref dest, owner: None } if dest == &taken)
        );
        assert!(!fx.file_root().join("_modules/mypkg").exists());
        // Folder predates the install and is kept with its content
        assert_eq!(fs::read_to_string(&taken).unwrap(), "hand-written pillar");
    }

    #[tokio::test]
    async fn test_install_collision_names_owning_package() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package("mypkg", MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let taken = fx.file_root().join("_modules/mypkg/foo.py");
        // A hand-edited ledger claims a path this install would create
        fs::create_dir_all(fx.config.spm_dir()).unwrap();
        fs::write(
            fx.config.installed_path(),
            format!("other:\n  url: other.git\n  files:\n  - {}\n", taken.display()),
        )
        .unwrap();
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap_err();

        assert!(
            matches!(err, SpmError::LinkCollision { ref owner, .. } if owner.as_deref() == Some("other"))
        );
        assert!(!taken.exists());
        assert_eq!(engine.list().unwrap(), vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn test_install_duplicate_basenames_rejected() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package(
            "dup",
            "modules:\n  - a/util.py\n  - b/util.py\n",
            &["a/util.py", "b/util.py"],
        );
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 16);
        assert!(!fx.file_root().join("_modules/dup").exists());
    }

    #[tokio::test]
    async fn test_install_invalid_name_touches_nothing_but_storage() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("https://host/_modules.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SpmError::InvalidPackageName { .. }));
        assert!(!fx.file_root().exists());
    }

    #[tokio::test]
    async fn test_install_times_out_on_held_lock() {
        let fx = Fixture::new();
        let runtime = RealRuntime;
        let fetcher = MockFetcher::new();
        let src = fx.local_package("mypkg", MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);
        engine.initialize().unwrap();

        let _held = crate::ledger::LedgerLock::acquire(
            &fx.config.lock_path(),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let err = engine
            .install(src.to_str().unwrap(), &develop())
            .await
            .unwrap_err();

        assert!(matches!(err, SpmError::LockTimeout { .. }));
        assert!(!fx.file_root().join("_modules/mypkg").exists());
    }

    /// Faults injected into an otherwise real filesystem.
    #[derive(Default)]
    struct Faults {
        /// Fail creating the link with this file name
        symlink: Option<&'static str>,
        rename: bool,
        remove_symlink: bool,
    }

    fn denied() -> anyhow::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into()
    }

    fn faulty_runtime(faults: Faults) -> MockRuntime {
        let Faults {
            symlink,
            rename,
            remove_symlink,
        } = faults;
        let mut runtime = MockRuntime::new();
        runtime
            .expect_write()
            .returning(|p, c| RealRuntime.write(p, c));
        runtime
            .expect_read_to_string()
            .returning(|p| RealRuntime.read_to_string(p));
        runtime.expect_rename().returning(move |from, to| {
            if rename {
                Err(denied())
            } else {
                RealRuntime.rename(from, to)
            }
        });
        runtime
            .expect_create_dir_all()
            .returning(|p| RealRuntime.create_dir_all(p));
        runtime
            .expect_remove_file()
            .returning(|p| RealRuntime.remove_file(p));
        runtime
            .expect_remove_dir()
            .returning(|p| RealRuntime.remove_dir(p));
        runtime
            .expect_remove_dir_all()
            .returning(|p| RealRuntime.remove_dir_all(p));
        runtime.expect_exists().returning(|p| RealRuntime.exists(p));
        runtime.expect_is_dir().returning(|p| RealRuntime.is_dir(p));
        runtime
            .expect_canonicalize()
            .returning(|p| RealRuntime.canonicalize(p));
        runtime.expect_symlink().returning(move |original, link| {
            if symlink.is_some_and(|f| link.file_name() == Some(std::ffi::OsStr::new(f))) {
                Err(denied())
            } else {
                RealRuntime.symlink(original, link)
            }
        });
        runtime
            .expect_is_symlink()
            .returning(|p| RealRuntime.is_symlink(p));
        runtime.expect_remove_symlink().returning(move |p| {
            if remove_symlink {
                Err(denied())
            } else {
                RealRuntime.remove_symlink(p)
            }
        });
        runtime
    }

    #[tokio::test]
    async fn test_install_link_failure_removes_earlier_links() {
        let fx = Fixture::new();
        let runtime = faulty_runtime(Faults {
            symlink: Some("two.py"),
            ..Faults::default()
        });
        let fetcher = fetcher_writing(
            "modules:\n  - one.py\n  - two.py\n",
            &["one.py", "two.py"],
        );
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SpmError::LinkPermission { ref path, .. } if path.ends_with("two.py")));
        let one = fx.file_root().join("_modules/mypkg/one.py");
        assert!(fs::symlink_metadata(&one).is_err(), "{:?} survived", one);
        assert!(!fx.file_root().join("_modules/mypkg").exists());
        assert!(!fx.config.pkgs_dir().join("mypkg").exists());
        assert!(ledger(&fx).is_empty());
    }

    #[tokio::test]
    async fn test_install_ledger_failure_removes_all_links() {
        let fx = Fixture::new();
        let runtime = faulty_runtime(Faults {
            rename: true,
            ..Faults::default()
        });
        let fetcher = fetcher_writing(MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SpmError::Io { .. }), "got {:?}", err);
        for link in ["_modules/mypkg/foo.py", "_modules/mypkg"] {
            let path = fx.file_root().join(link);
            assert!(fs::symlink_metadata(&path).is_err(), "{:?} survived", path);
        }
        assert!(!fx.pillar_root().join("mypkg").exists());
        assert!(!fx.config.pkgs_dir().join("mypkg").exists());
        assert!(ledger(&fx).is_empty());
    }

    #[tokio::test]
    async fn test_install_reports_orphans_when_rollback_fails() {
        let fx = Fixture::new();
        let runtime = faulty_runtime(Faults {
            rename: true,
            remove_symlink: true,
            ..Faults::default()
        });
        let fetcher = fetcher_writing(MYPKG_MANIFEST, &["foo.py", "bar.sls"]);
        let engine = PackageLifecycleEngine::new(&runtime, &fetcher, &fx.config);

        let err = engine
            .install("git+repo/mypkg.git", &InstallOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 22);
        match err {
            SpmError::PartialInstall {
                name,
                cause,
                orphaned,
            } => {
                assert_eq!(name, "mypkg");
                assert!(matches!(*cause, SpmError::Io { .. }));
                assert!(orphaned.contains(&fx.file_root().join("_modules/mypkg/foo.py")));
                assert!(orphaned.contains(&fx.pillar_root().join("mypkg/bar.sls")));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(ledger(&fx).is_empty());
    }
}
