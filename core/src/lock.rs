//! Per-node advisory lock so only one controller process runs a pass at a time.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_LOCK_PATH: &str = "/run/importer-node/reconcile.lock";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("cannot open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out acquiring lock {} after {timeout_ms}ms", path.display())]
    Timeout { path: PathBuf, timeout_ms: u64 },
}

/// File-lock guard that releases the lock on drop.
#[derive(Debug)]
pub struct NodeLock {
    file: File,
    path: PathBuf,
}

impl NodeLock {
    /// Acquire an exclusive `flock(2)` on `path`, polling until `timeout_ms`
    /// elapses.
    pub fn acquire(path: &Path, timeout_ms: u64) -> Result<NodeLock, LockError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let fd = file.as_raw_fd();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                tracing::debug!(path = %path.display(), "node lock acquired");
                return Ok(NodeLock {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    timeout_ms,
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        // The file stays; removing it would race with a waiter that opened it.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
