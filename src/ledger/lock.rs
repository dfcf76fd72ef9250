//! Advisory lock serializing ledger read-modify-write cycles across processes.
//!
//! The lock lives on its own file next to the ledger because the ledger
//! itself is replaced by rename on every save.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::SpmError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held exclusive lock; released on drop.
pub struct LedgerLock {
    path: PathBuf,
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
}

impl LedgerLock {
    /// Wait up to `timeout` for the lock at `path`. A timeout too large to
    /// represent as a deadline waits without bound.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, SpmError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                debug!("Acquired ledger lock {:?}", path);
                return Ok(lock);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SpmError::LockTimeout {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            debug!("Ledger lock {:?} is held, waiting", path);
            tokio::time::sleep(wait).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` if another holder has it.
    #[cfg(unix)]
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, SpmError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| SpmError::io("failed to open lock file", path, e.into()))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(Self {
                path: path.to_path_buf(),
                _flock: flock,
            })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(SpmError::io(
                "failed to lock",
                path,
                std::io::Error::from(errno).into(),
            )),
        }
    }

    /// `Ok(None)` if another holder has it.
    #[cfg(not(unix))]
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, SpmError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Some(Self {
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(SpmError::io("failed to create lock file", path, e.into())),
        }
    }
}

impl std::fmt::Debug for LedgerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerLock").field("path", &self.path).finish()
    }
}

#[cfg(not(unix))]
impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
