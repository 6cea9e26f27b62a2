//! Cross-process advisory locking
//!
//! One lock file per artifact. The file never holds data; it exists only so
//! that every process pointed at the same cache root can take an exclusive
//! OS lock on it. Acquisition blocks without a timeout. The lock is released
//! when the guard is dropped, which also covers early returns and panics.

use crate::error::{KilnError, KilnResult};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock capability
///
/// Implementations must block until the lock is held and must release it
/// when the returned guard is dropped.
pub trait ExclusiveLock: Send + Sync {
    /// Guard type holding the lock
    type Guard;

    /// Block until the lock keyed by `path` is held
    fn acquire(&self, path: &Path) -> KilnResult<Self::Guard>;
}

/// Run `f` while holding the lock keyed by `path`
pub fn with_lock<L, T, F>(lock: &L, path: &Path, f: F) -> KilnResult<T>
where
    L: ExclusiveLock,
    F: FnOnce() -> KilnResult<T>,
{
    let _guard = lock.acquire(path)?;
    f()
}

/// Lock backed by the OS file-locking primitive
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLock;

/// Held file lock, released on drop
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Closing the handle releases the lock too; unlocking first keeps
        // the release independent of when the handle is closed.
        if let Err(e) = unlock(&self.file) {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
        debug!("Released lock {}", self.path.display());
    }
}

impl ExclusiveLock for FileLock {
    type Guard = FileLockGuard;

    fn acquire(&self, path: &Path) -> KilnResult<FileLockGuard> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| KilnError::Lock {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!("Waiting for lock {}", path.display());
        lock_exclusive(&file).map_err(|e| KilnError::Lock {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Acquired lock {}", path.display());

        Ok(FileLockGuard {
            file,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK};

    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
    // Without LOCKFILE_FAIL_IMMEDIATELY the call blocks until the range is free.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed();
        LockFileEx(handle, LOCKFILE_EXCLUSIVE_LOCK, 0, 1, 0, &mut overlapped)
    };

    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(windows)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;

    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: same handle and range as the matching LockFileEx call.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed();
        UnlockFileEx(handle, 0, 1, 0, &mut overlapped)
    };

    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
