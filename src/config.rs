use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SPM_DIR: &str = "/etc/salt/spm";
pub const DEFAULT_MASTER_CONFIG: &str = "/etc/salt/master";
pub const DEFAULT_MINION_CONFIG: &str = "/etc/salt/minion";
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Content of the local client configuration written on first use.
pub const CLIENT_CONFIG: &str = "master: localhost\nfile_client: local\n";

/// Process-wide settings, built once in `main` and passed by reference.
///
/// Nothing below `main` reads the environment; every location the engine
/// touches is derived from this value.
#[derive(Debug, Clone)]
pub struct Config {
    pub spm_dir: PathBuf,
    pub master_config: PathBuf,
    pub minion_config: PathBuf,
    pub lock_timeout: Duration,
}

impl Config {
    pub fn new(spm_dir: impl Into<PathBuf>) -> Self {
        Self {
            spm_dir: spm_dir.into(),
            master_config: PathBuf::from(DEFAULT_MASTER_CONFIG),
            minion_config: PathBuf::from(DEFAULT_MINION_CONFIG),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    pub fn with_host_configs(
        mut self,
        master_config: impl Into<PathBuf>,
        minion_config: impl Into<PathBuf>,
    ) -> Self {
        self.master_config = master_config.into();
        self.minion_config = minion_config.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn spm_dir(&self) -> &Path {
        &self.spm_dir
    }

    /// Local copies of fetched sources: `<spm_dir>/pkgs`
    pub fn pkgs_dir(&self) -> PathBuf {
        self.spm_dir.join("pkgs")
    }

    /// Ledger of installed packages: `<spm_dir>/installed`
    pub fn installed_path(&self) -> PathBuf {
        self.spm_dir.join("installed")
    }

    /// Local client configuration: `<spm_dir>/client`
    pub fn client_path(&self) -> PathBuf {
        self.spm_dir.join("client")
    }

    /// Advisory lock guarding the ledger: `<spm_dir>/installed.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.spm_dir.join("installed.lock")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SPM_DIR)
    }
}
