//! # State File Lock
//!
//! Uses `fs2` for cross-platform advisory locking (flock on Unix, LockFile
//! on Windows). The lock file sits next to the state file as
//! `<state>.lock` and carries the holder's PID.

use crate::domain::errors::LockError;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive lock on one receiver's state file.
///
/// Acquired when the store is opened, released on drop (RAII). A second
/// process fails immediately instead of waiting.
#[derive(Debug)]
pub struct StateLock {
    /// Kept open to maintain the lock
    file: File,
    path: PathBuf,
    pid: u32,
}

impl StateLock {
    /// Lock file path for a given state file.
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = OsString::from(state_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock for `state_path`.
    ///
    /// # Errors
    ///
    /// `LockError::AlreadyLocked` if another process holds it.
    pub fn acquire(state_path: &Path) -> Result<Self, LockError> {
        let path = Self::lock_path(state_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(LockError::CreateFailed)?;
            }
        }

        // No truncate before locking: the holder's PID must stay readable
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyLocked {
                pid: Self::read_existing_pid(&path),
                path,
            });
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        file.seek(SeekFrom::Start(0)).map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", pid).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        Ok(Self { file, path, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        #[allow(clippy::incompatible_msrv)]
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            StateLock::lock_path(Path::new("/var/lib/ur/state.db")),
            PathBuf::from("/var/lib/ur/state.db.lock")
        );
    }

    #[test]
    fn test_second_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.db");

        let lock = StateLock::acquire(&state).unwrap();
        assert_eq!(lock.pid(), std::process::id());

        match StateLock::acquire(&state) {
            Err(LockError::AlreadyLocked { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.db");

        let lock = StateLock::acquire(&state).unwrap();
        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());

        assert!(StateLock::acquire(&state).is_ok());
    }
}
