//! Cooperative file sharing via advisory locks.
//!
//! Cross-platform (fs2) locks express share-mode opens: readers take a
//! shared lock on the file they open, writers an exclusive one. A contended
//! open is not an error; it is retried on a fixed delay until the lock is
//! granted or the configured attempt bound runs out. Locks are released on
//! Drop.
//!
//! This serializes access at the file-handle level only; it does not make
//! multi-file sequences (read free list, mutate, write free list) atomic.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use log::trace;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An open file holding an advisory lock for its lifetime.
#[derive(Debug)]
pub struct FileGuard {
    pub file: File,
    mode: LockMode,
}

impl FileGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Current file length.
    pub fn len(&self) -> Result<i64> {
        Ok(self.file.metadata()?.len() as i64)
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

/// Open for reading under a shared lock. The file must exist.
pub fn open_shared(path: &Path, retry: &RetryPolicy) -> Result<FileGuard> {
    let opts = {
        let mut o = OpenOptions::new();
        o.read(true);
        o
    };
    open_locked(path, &opts, LockMode::Shared, retry)
}

/// Open for reading and writing under an exclusive lock, creating the file
/// if it does not exist.
pub fn open_exclusive(path: &Path, retry: &RetryPolicy) -> Result<FileGuard> {
    let opts = {
        let mut o = OpenOptions::new();
        o.read(true).write(true).create(true);
        o
    };
    open_locked(path, &opts, LockMode::Exclusive, retry)
}

fn open_locked(
    path: &Path,
    opts: &OpenOptions,
    mode: LockMode,
    retry: &RetryPolicy,
) -> Result<FileGuard> {
    let mut attempts: u64 = 0;
    loop {
        // Hard open failures (missing file, permissions) are not contention
        // and surface immediately with the original message attached.
        let file = opts
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;

        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match locked {
            Ok(()) => return Ok(FileGuard { file, mode }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                attempts += 1;
                if retry.max_attempts != 0 && attempts >= retry.max_attempts {
                    bail!(
                        "{} still locked after {} attempt(s)",
                        path.display(),
                        attempts
                    );
                }
                trace!(
                    "{} is locked, retrying in {:?}",
                    path.display(),
                    retry.delay
                );
                drop(file);
                std::thread::sleep(retry.delay);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("lock {}", path.display()));
            }
        }
    }
}
