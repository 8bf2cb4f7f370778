use std::{
    fs::{File, OpenOptions, TryLockError},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::{AnnotateError, Result};

/// Exclusive advisory lock on a sidecar file, held until dropped.
///
/// The sidecar is never removed: its existence means nothing, only the OS
/// lock on it does, and the OS releases that lock if the holder dies.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Polls for the lock every `retry` until `timeout` has elapsed.
    pub fn acquire(path: &Path, timeout: Duration, retry: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        let started = Instant::now();

        loop {
            match file.try_lock() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(AnnotateError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    tracing::debug!(lock = %path.display(), ?waited, "store lock busy, retrying");
                    std::thread::sleep(retry.min(timeout - waited));
                }
                Err(TryLockError::Error(err)) => return Err(err.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(60);
    const RETRY: Duration = Duration::from_millis(5);

    #[test]
    fn acquires_and_releases_lock_file() {
        let temp = tempfile::tempdir().expect("tempdir should create");
        let lock_path = temp.path().join("labels.csv.lock");

        let guard = StoreLock::acquire(&lock_path, SHORT, RETRY).expect("lock should acquire");
        assert!(lock_path.is_file());
        assert_eq!(guard.path(), lock_path);
        drop(guard);

        let again = StoreLock::acquire(&lock_path, SHORT, RETRY);
        assert!(again.is_ok());
        assert!(lock_path.exists());
    }

    #[test]
    fn times_out_while_another_holder_is_active() {
        let temp = tempfile::tempdir().unwrap();
        let lock_path = temp.path().join("labels.csv.lock");
        let _held = StoreLock::acquire(&lock_path, SHORT, RETRY).unwrap();

        let err = StoreLock::acquire(&lock_path, SHORT, RETRY).unwrap_err();
        match err {
            AnnotateError::LockTimeout { waited, .. } => assert!(waited >= SHORT),
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }
}
