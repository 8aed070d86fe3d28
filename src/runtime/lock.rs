//! Exclusive advisory locks on lock files.

use anyhow::{Context, Result};
use fs4::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::Path;

use super::RealRuntime;

/// Guard for an exclusive lock. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct DirLock {
    file: Option<File>,
}

impl DirLock {
    /// A guard that holds nothing. Used by runtimes without real locking.
    pub fn unlocked() -> Self {
        Self { file: None }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn lock_exclusive_impl(&self, path: &Path) -> Result<DirLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create lock directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        debug!("Waiting for lock {:?}", path);
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(DirLock { file: Some(file) })
    }
}
