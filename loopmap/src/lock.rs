//! Host-wide advisory lock around loop table mutations.
//!
//! losetup/kpartx already find and claim a free device atomically. The lock adds
//! exclusivity between loopmap processes that opt in with the same lock file.

use crate::errors::{MapError, MapResult};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive `flock` held until drop.
#[derive(Debug)]
pub struct HostLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl HostLock {
    /// Block (polling) until the lock is free or `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> MapResult<Self> {
        let start = Instant::now();
        let mut file = open_lock_file(path)?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    log::debug!("acquired host lock {}", path.display());
                    return Ok(Self {
                        _lock: lock,
                        path: path.to_path_buf(),
                    });
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                    if start.elapsed() >= timeout {
                        return Err(lock_error(
                            path,
                            format!("still held by another process after {}ms", timeout.as_millis()),
                        ));
                    }
                    file = returned;
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err((_, errno)) => return Err(lock_error(path, errno.to_string())),
            }
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(path: &Path) -> MapResult<Option<Self>> {
        let file = open_lock_file(path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(Self {
                _lock: lock,
                path: path.to_path_buf(),
            })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(lock_error(path, errno.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> MapResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| lock_error(path, e.to_string()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| lock_error(path, e.to_string()))
}

fn lock_error(path: &Path, reason: impl Into<String>) -> MapError {
    MapError::Lock {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
