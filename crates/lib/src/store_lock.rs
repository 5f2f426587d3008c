//! Cross-process advisory locking for file-backed storage.
//!
//! The engine serializes mutations inside one process with its own mutex.
//! Separate CLI invocations sharing a storage directory take this lock first:
//! exclusive for commands that write, shared for commands that only read.
//! A writer records `<pid> <command>` in the lock file so a refused caller
//! can say who holds it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error("storage is in use by {holder}; remove {} if no idstore process is running", .lock_path.display())]
  Busy { holder: String, lock_path: PathBuf },

  #[error("failed to lock {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held storage lock; released when dropped.
#[derive(Debug)]
pub struct StoreLock {
  _file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Lock the storage directory `storage`, creating it if needed.
  ///
  /// Never waits: an incompatible lock held elsewhere is [`StoreLockError::Busy`].
  pub fn acquire(storage: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    let lock_path = storage.join(LOCK_FILENAME);
    let io_err = |source: io::Error| StoreLockError::Io {
      path: lock_path.clone(),
      source,
    };

    fs::create_dir_all(storage).map_err(io_err)?;
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_err)?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(StoreLockError::Busy {
          holder: read_holder(&lock_path),
          lock_path: lock_path.clone(),
        });
      }
      Err(e) => return Err(io_err(e)),
    }

    if mode == LockMode::Exclusive {
      file.set_len(0).map_err(io_err)?;
      writeln!(file, "{} {command}", std::process::id()).map_err(io_err)?;
    }

    debug!(path = %lock_path.display(), ?mode, command, "storage lock acquired");
    Ok(Self { _file: file, lock_path })
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

/// Describe the process recorded in the lock file.
fn read_holder(lock_path: &Path) -> String {
  let contents = fs::read_to_string(lock_path).unwrap_or_default();
  match contents.trim().split_once(' ') {
    Some((pid, command)) => format!("'{command}' (pid {pid})"),
    None => "another process".to_string(),
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file, operation).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: the handle is owned by `file` and a zeroed OVERLAPPED is valid.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle(), flags, 0, 1, 0, &mut overlapped)
  };
  if locked == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
