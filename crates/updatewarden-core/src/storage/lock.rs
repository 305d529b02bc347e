//! Per-policy advisory lock.
//!
//! Only one evaluation per policy identifier may run at a time, otherwise two
//! overlapping runs could both consume a deferral. The lock is an exclusive
//! `flock` on `<dir>/<policy_id>.lock`, released when the guard drops or the
//! process dies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::StoreError;

/// Held for the duration of one evaluation.
#[derive(Debug)]
pub struct PolicyLock {
    file: File,
    path: PathBuf,
}

impl PolicyLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(dir: &Path, policy_id: &str) -> Result<Option<Self>, StoreError> {
        let path = dir.join(format!("{}.lock", sanitize(policy_id)));

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(source) => return Err(StoreError::LockFailed { path, source }),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired policy lock");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(StoreError::LockFailed { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PolicyLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn sanitize(policy_id: &str) -> String {
    policy_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
