// ABOUTME: Process-wide run lock for reconciliation passes
// ABOUTME: Advisory lock on a PID file that keeps two passes from purging the same tables at once

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ReconcileError, Result};

/// Held for the duration of one pass.
///
/// Exclusion comes from an advisory lock on the open file, which the kernel
/// drops when the holder exits, so a crashed pass never leaves a lock behind.
/// The file itself is never unlinked: removing it would let a second process
/// lock a fresh inode while a third still holds the old one.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Take the lock, or fail with `AlreadyRunning` naming the current holder.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| lock_io_error(path, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_io_error(path, e))?;

        if !try_lock_exclusive(&file).map_err(|e| lock_io_error(path, e))? {
            return Err(ReconcileError::AlreadyRunning(read_pid(path).unwrap_or(-1)));
        }

        if let Some(previous) = read_pid(path) {
            tracing::debug!("Reclaiming run lock {:?} last held by pid {}", path, previous);
        }
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| write!(file, "{}", std::process::id()))
            .and_then(|_| file.flush())
            .map_err(|e| lock_io_error(path, e))?;

        tracing::debug!("Acquired run lock {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Still locked here, so the file is ours to clear. Closing it releases the lock.
        if let Err(e) = self.file.set_len(0) {
            tracing::warn!("Failed to clear run lock {:?}: {}", self.path, e);
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn lock_io_error(path: &Path, e: std::io::Error) -> ReconcileError {
    ReconcileError::LockUnavailable(format!("{:?}: {}", path, e))
}

/// Non-blocking exclusive lock. `Ok(false)` when another descriptor holds it.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(e)) => Err(e),
    }
}
