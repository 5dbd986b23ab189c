//! Advisory locking of a store directory.
//!
//! Every open, read-only or not, takes the lock exclusively: the embedded
//! database file admits a single process at a time, so a second open of the same
//! directory fails with `WouldBlock` until the first handle is dropped.
//!
//! # Safety
//! - Lock is released when FileLock is dropped
//! - Lock file is created if it doesn't exist
//! - Non-blocking lock attempt with clear error on failure

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the store directory.
pub const LOCK_FILE: &str = ".lock";

/// Held lock on a store directory.
///
/// The lock is held for the lifetime of this struct and automatically
/// released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Attempts to lock `dir` without blocking.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if a conflicting lock is held
    /// - `ErrorKind::PermissionDenied` if the lock file cannot be opened
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let lock_path = dir.join(LOCK_FILE);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        Self::try_lock(&file)?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for this call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let errno = IoError::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "store is locked by another process",
                ));
            }
            return Err(errno);
        }

        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: `handle` is owned by `file`; OVERLAPPED is plain data.
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
        };

        if result == 0 {
            let err = IoError::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("store is locked by another process: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
