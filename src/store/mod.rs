//! Version-addressed layout of installed packages.
//!
//! ```text
//! <apps-root>/
//!   .locks/<name>.<origin>.lock
//!   .staging/
//!   <name>.<origin>/
//!     <version>/          complete version directories
//!       .install-order    install sequence number of this version
//!     .<version>.partial  being placed, never listed
//!     current -> <version>
//! ```
//!
//! Both mutations that readers can observe are single renames: a version
//! directory appears when its `.partial` sibling is renamed into place, and the
//! `current` marker is swapped by renaming a freshly created symlink over it.

mod users;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::SnapError;
use crate::package::PackageIdentity;
use crate::runtime::{DirLock, Runtime};

pub use users::{HomeRootUsers, UserDirectory, UserHandle};

const CURRENT_LINK: &str = "current";
const PENDING_LINK: &str = ".current.new";
const LOCKS_DIR: &str = ".locks";
const STAGING_DIR: &str = ".staging";
const ORDER_FILE: &str = ".install-order";

/// One version directory of an installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub version: String,
    pub path: PathBuf,
    pub installed_at: SystemTime,
    /// Install sequence number; `None` for directories placed without one
    pub order: Option<u64>,
    /// Whether the current marker points here
    pub active: bool,
}

/// An installed package and its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub id: PackageIdentity,
    pub version: String,
}

pub struct VersionStore<'a, R: Runtime> {
    runtime: &'a R,
    apps_root: PathBuf,
    users: &'a dyn UserDirectory,
}

impl<'a, R: Runtime> VersionStore<'a, R> {
    pub fn new(runtime: &'a R, apps_root: PathBuf, users: &'a dyn UserDirectory) -> Self {
        Self {
            runtime,
            apps_root,
            users,
        }
    }

    pub fn runtime(&self) -> &'a R {
        self.runtime
    }

    pub fn apps_root(&self) -> &Path {
        &self.apps_root
    }

    /// `<apps-root>/<name>.<origin>`
    pub fn package_dir(&self, id: &PackageIdentity) -> PathBuf {
        self.apps_root.join(id.dir_name())
    }

    /// `<apps-root>/<name>.<origin>/<version>`
    pub fn version_dir(&self, id: &PackageIdentity, version: &str) -> PathBuf {
        self.package_dir(id).join(version)
    }

    /// `<apps-root>/<name>.<origin>/current`
    pub fn current_link(&self, id: &PackageIdentity) -> PathBuf {
        self.package_dir(id).join(CURRENT_LINK)
    }

    fn partial_dir(&self, id: &PackageIdentity, version: &str) -> PathBuf {
        self.package_dir(id).join(format!(".{}.partial", version))
    }

    /// Scratch space on the same filesystem as the version directories.
    pub fn staging_root(&self) -> PathBuf {
        self.apps_root.join(STAGING_DIR)
    }

    /// Serializes mutations of one `(name, origin)`. Different packages use
    /// different lock files and do not contend.
    pub fn lock(&self, id: &PackageIdentity) -> Result<DirLock> {
        let path = self
            .apps_root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", id.dir_name()));
        self.runtime.lock_exclusive(&path)
    }

    /// Writes a version directory. `fill` receives a private directory to
    /// populate; it becomes visible under the version name only once `fill`
    /// succeeded. Fails with [`SnapError::AlreadyPlaced`] if the version
    /// directory already exists with content.
    #[tracing::instrument(skip(self, fill))]
    pub fn place<F>(&self, id: &PackageIdentity, version: &str, fill: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let target = self.version_dir(id, version);
        if self.runtime.is_dir(&target) {
            if !self.runtime.read_dir(&target)?.is_empty() {
                return Err(SnapError::AlreadyPlaced {
                    name: id.name.clone(),
                    version: version.to_string(),
                }
                .into());
            }
            debug!("Replacing empty version directory {:?}", target);
            self.runtime.remove_dir_all(&target)?;
        }

        let partial = self.partial_dir(id, version);
        if self.runtime.exists(&partial) {
            debug!("Removing leftover {:?}", partial);
            self.runtime.remove_dir_all(&partial)?;
        }
        self.runtime
            .create_dir_all(&partial)
            .with_context(|| format!("Failed to create {:?}", partial))?;

        let filled = fill(&partial).and_then(|_| self.record_order(id, &partial));
        if let Err(e) = filled {
            if let Err(cleanup) = self.runtime.remove_dir_all(&partial) {
                warn!("Failed to clean up {:?}: {}", partial, cleanup);
            }
            return Err(e);
        }

        self.runtime
            .rename(&partial, &target)
            .with_context(|| format!("Failed to move {:?} into place", partial))?;
        debug!("Placed {} {} at {:?}", id, version, target);
        Ok(target)
    }

    /// Stamps `dir` with the next install sequence number of the package.
    fn record_order(&self, id: &PackageIdentity, dir: &Path) -> Result<()> {
        let next = self
            .versions(id)?
            .iter()
            .filter_map(|v| v.order)
            .max()
            .map_or(1, |n| n + 1);
        let path = dir.join(ORDER_FILE);
        self.runtime
            .write(&path, next.to_string().as_bytes())
            .with_context(|| format!("Failed to record install order in {:?}", path))
    }

    fn read_order(&self, dir: &Path) -> Option<u64> {
        let path = dir.join(ORDER_FILE);
        if !self.runtime.exists(&path) {
            return None;
        }
        match self.runtime.read_to_string(&path) {
            Ok(content) => content.trim().parse().ok(),
            Err(e) => {
                warn!("Cannot read install order of {:?}: {}", dir, e);
                None
            }
        }
    }

    /// Points the current marker at `version` with a single rename.
    #[tracing::instrument(skip(self))]
    pub fn promote(&self, id: &PackageIdentity, version: &str) -> Result<()> {
        let target = self.version_dir(id, version);
        if !self.runtime.is_dir(&target) || self.runtime.is_symlink(&target) {
            bail!("Cannot promote {} {}: {:?} is not placed", id, version, target);
        }

        let current = self.current_link(id);
        if self.runtime.exists(&current) && !self.runtime.is_symlink(&current) {
            bail!("{:?} exists but is not a symlink", current);
        }

        if self.current_version(id).as_deref() == Some(version) {
            debug!("'current' already points to {}", version);
            return Ok(());
        }

        let pending = self.package_dir(id).join(PENDING_LINK);
        if self.runtime.is_symlink(&pending) || self.runtime.exists(&pending) {
            self.runtime.remove_symlink(&pending)?;
        }
        self.runtime
            .symlink(Path::new(version), &pending)
            .with_context(|| format!("Failed to create {:?}", pending))?;

        if let Err(e) = self.runtime.rename(&pending, &current) {
            let _ = self.runtime.remove_symlink(&pending);
            return Err(e).with_context(|| format!("Failed to update {:?} to {}", current, version));
        }
        debug!("'current' of {} now points to {}", id, version);
        Ok(())
    }

    /// Name of the version the current marker points at, if it resolves to a
    /// placed version directory.
    pub fn current_version(&self, id: &PackageIdentity) -> Option<String> {
        let target = self.runtime.read_link(&self.current_link(id)).ok()?;
        let version = target.file_name()?.to_str()?.to_string();
        if self.runtime.is_dir(&self.version_dir(id, &version)) {
            Some(version)
        } else {
            warn!("'current' of {} points to missing version {}", id, version);
            None
        }
    }

    /// Every placed version of the package, oldest install first.
    #[tracing::instrument(skip(self))]
    pub fn versions(&self, id: &PackageIdentity) -> Result<Vec<InstalledVersion>> {
        let package_dir = self.package_dir(id);
        if !self.runtime.is_dir(&package_dir) {
            return Ok(vec![]);
        }

        let current = self.current_version(id);
        let mut versions = Vec::new();
        for entry in self.runtime.read_dir(&package_dir)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == CURRENT_LINK
                || name.starts_with('.')
                || self.runtime.is_symlink(&entry)
                || !self.runtime.is_dir(&entry)
            {
                continue;
            }
            let installed_at = self.runtime.modified(&entry)?;
            versions.push(InstalledVersion {
                version: name.to_string(),
                active: current.as_deref() == Some(name),
                order: self.read_order(&entry),
                path: entry.clone(),
                installed_at,
            });
        }

        // Unnumbered directories predate the numbered ones
        versions.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.installed_at.cmp(&b.installed_at))
                .then_with(|| a.version.cmp(&b.version))
        });
        Ok(versions)
    }

    /// The active version, or [`SnapError::NotInstalled`].
    pub fn current(&self, id: &PackageIdentity) -> Result<InstalledVersion> {
        self.versions(id)?
            .into_iter()
            .find(|v| v.active)
            .ok_or_else(|| SnapError::NotInstalled(id.to_string()).into())
    }

    /// Deletes a non-current version directory and the users' data for it.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, id: &PackageIdentity, version: &str) -> Result<()> {
        if self.current_version(id).as_deref() == Some(version) {
            return Err(SnapError::CannotRemoveCurrent {
                name: id.name.clone(),
                version: version.to_string(),
            }
            .into());
        }

        let dir = self.version_dir(id, version);
        if !self.runtime.is_dir(&dir) {
            return Err(SnapError::NotFound(format!("{} {}", id, version)).into());
        }
        self.runtime
            .remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove {:?}", dir))?;

        for path in self.user_data_for_version(id, version)? {
            if let Err(e) = self.runtime.remove_dir_all(&path) {
                warn!("Failed to remove user data {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    /// Every installed package (one with a resolvable current marker).
    #[tracing::instrument(skip(self))]
    pub fn installed(&self) -> Result<Vec<InstalledPackage>> {
        if !self.runtime.is_dir(&self.apps_root) {
            return Ok(vec![]);
        }

        let mut packages = Vec::new();
        for entry in self.runtime.read_dir(&self.apps_root)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !self.runtime.is_dir(&entry) {
                continue;
            }
            let Ok(id) = name.parse::<PackageIdentity>() else {
                debug!("Ignoring {:?}: not a package directory", entry);
                continue;
            };
            if let Some(version) = self.current_version(&id) {
                packages.push(InstalledPackage { id, version });
            }
        }
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(packages)
    }

    /// Installed packages with the given name, from any origin.
    pub fn installed_by_name(&self, name: &str) -> Result<Vec<InstalledPackage>> {
        Ok(self
            .installed()?
            .into_iter()
            .filter(|p| p.id.name == name)
            .collect())
    }

    /// Every user's data directory for any version of the package:
    /// `<home>/<user>/apps/<name>/<version>`.
    pub fn user_data_paths(&self, id: &PackageIdentity) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for user in self.users.list_users()? {
            let package_data = user.apps_dir().join(&id.name);
            if !self.runtime.is_dir(&package_data) {
                continue;
            }
            for entry in self.runtime.read_dir(&package_data)? {
                if self.runtime.is_dir(&entry) {
                    paths.push(entry);
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn user_data_for_version(&self, id: &PackageIdentity, version: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .user_data_paths(id)?
            .into_iter()
            .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(version))
            .collect())
    }

    /// Copies each user's data for `from` to `to` where `to` has none yet.
    /// Returns the directories created. Per-user failures are logged.
    #[tracing::instrument(skip(self))]
    pub fn migrate_user_data(
        &self,
        id: &PackageIdentity,
        from: &str,
        to: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for user in self.users.list_users()? {
            let package_data = user.apps_dir().join(&id.name);
            let source = package_data.join(from);
            let dest = package_data.join(to);
            if !self.runtime.is_dir(&source) || self.runtime.exists(&dest) {
                continue;
            }

            let partial = package_data.join(format!(".{}.partial", to));
            let result = copy_dir_all(self.runtime, &source, &partial)
                .and_then(|_| self.runtime.rename(&partial, &dest));
            match result {
                Ok(()) => {
                    debug!("Copied data of {} for {} to {}", id, user.name, to);
                    created.push(dest);
                }
                Err(e) => {
                    warn!("Failed to copy data of {} for {}: {}", id, user.name, e);
                    let _ = self.runtime.remove_dir_all(&partial);
                }
            }
        }
        Ok(created)
    }
}

/// Recursively copies a directory tree. Symlinks are recreated, not followed.
fn copy_dir_all<R: Runtime>(runtime: &R, from: &Path, to: &Path) -> Result<()> {
    runtime.create_dir_all(to)?;
    for entry in runtime.read_dir(from)? {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let dest = to.join(name);
        if runtime.is_symlink(&entry) {
            let target = runtime.read_link(&entry)?;
            runtime.symlink(&target, &dest)?;
        } else if runtime.is_dir(&entry) {
            copy_dir_all(runtime, &entry, &dest)?;
        } else {
            runtime.copy(&entry, &dest)?;
        }
    }
    Ok(())
}
