//! Symlink operations (create, read, remove).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn symlink_impl(&self, original: &Path, link: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink as unix_symlink;
            unix_symlink(original, link).context("Failed to create symlink")?;
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::symlink_dir;

            // Version markers always point at directories, relative to the link's parent.
            symlink_dir(original, link).context("Failed to create directory symlink")?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_link_impl(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).context("Failed to read symlink")
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_symlink_impl(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_symlink_impl(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            fs::remove_file(path).context("Failed to remove symlink")?;
        }
        #[cfg(windows)]
        {
            // Directory symlinks need remove_dir on Windows; fall back to remove_file.
            fs::remove_dir(path)
                .or_else(|_| fs::remove_file(path))
                .context("Failed to remove symlink")?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_symlink_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let target = dir.path().join("1.0");
        runtime.create_dir_all(&target).unwrap();

        let link = dir.path().join("current");
        runtime.symlink(Path::new("1.0"), &link).unwrap();
        assert!(runtime.is_symlink(&link));
        assert!(!runtime.is_symlink(&target));
        assert!(runtime.is_dir(&link));

        assert_eq!(runtime.read_link(&link).unwrap(), Path::new("1.0"));

        runtime.remove_symlink(&link).unwrap();
        assert!(!runtime.exists(&link));
        assert!(runtime.exists(&target));
    }

    #[test]
    fn test_rename_symlink_over_symlink_replaces_target() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        runtime.create_dir_all(&dir.path().join("1.0")).unwrap();
        runtime.create_dir_all(&dir.path().join("2.0")).unwrap();

        let link = dir.path().join("current");
        let staged = dir.path().join(".current.new");
        runtime.symlink(Path::new("1.0"), &link).unwrap();
        runtime.symlink(Path::new("2.0"), &staged).unwrap();

        runtime.rename(&staged, &link).unwrap();

        assert_eq!(runtime.read_link(&link).unwrap(), Path::new("2.0"));
        assert!(!runtime.is_symlink(&staged));
    }

    #[test]
    fn test_read_link_on_regular_file_fails() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        runtime.write(&file, b"x").unwrap();

        assert!(runtime.read_link(&file).is_err());
        assert!(!runtime.is_symlink(&file));
    }
}
