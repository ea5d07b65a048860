// src/installer/lock.rs

//! Exclusive transaction lock
//!
//! Two transactions against the same database would interleave their file
//! and database mutations, so every mutating installer call holds an
//! advisory lock on `<state dir>/quarry.lock` for its whole duration.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const LOCK_FILE: &str = "quarry.lock";

/// Attempts before giving up: 0ms, 100ms, 200ms, 400ms, 800ms
const MAX_RETRIES: u32 = 5;

/// Held lock; released on drop
#[derive(Debug)]
pub struct TransactionLock {
    file: File,
    path: PathBuf,
}

impl TransactionLock {
    /// Take the lock in `state_dir`, retrying with exponential backoff
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        let file = File::create(&path)?;

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }

        Err(Error::LockError(format!(
            "Failed to acquire {} after {} attempts. Another transaction may be \
             in progress. Error: {}",
            path.display(),
            MAX_RETRIES,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransactionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
