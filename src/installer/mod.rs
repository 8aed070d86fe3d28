//! Single-package install: resolve, fetch, verify, place, promote, activate
//! and optionally collect superseded versions.

mod gc;
mod state;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::activation::{ActivationHook, NoHooks};
use crate::archive::{TarGzUnpacker, Unpacker};
use crate::catalog::{Catalog, CatalogEntry};
use crate::cleanup::{SharedCleanupContext, StagingGuard, new_shared};
use crate::download::download_file;
use crate::error::{SnapError, snap_error};
use crate::flags::InstallFlags;
use crate::http::HttpClient;
use crate::package::{
    PackageIdentity, PackageRef, SIDELOAD_ORIGIN, validate_name, validate_origin, validate_version,
};
use crate::progress::{NullProgress, ProgressSink};
use crate::runtime::Runtime;
use crate::store::VersionStore;
use crate::verify::{AuthenticityChecker, DigestChecker, StagedContent};

pub use gc::{GcReport, collect as collect_garbage};
pub use state::{InstallRun, InstallState};

/// Where the fetched icon ends up inside a version directory.
pub const ICON_PATH: &str = "meta/icon";

/// A package that finished installing.
#[derive(Debug)]
pub struct InstallOutcome {
    pub id: PackageIdentity,
    pub version: String,
    pub path: PathBuf,
    /// The version directory already existed and was only promoted
    pub reused: bool,
    pub gc: Option<GcReport>,
    pub states: Vec<InstallState>,
}

enum Source {
    Local(PathBuf),
    Catalog(CatalogEntry),
}

struct Resolved {
    id: PackageIdentity,
    version: String,
    source: Source,
}

/// Staged content plus the guards that delete it once it is no longer needed.
struct Staged {
    content: StagedContent,
    icon: Option<StagingGuard>,
    _download: Option<StagingGuard>,
}

pub struct Installer<'a, R: Runtime> {
    runtime: &'a R,
    store: &'a VersionStore<'a, R>,
    catalog: &'a dyn Catalog,
    http: &'a HttpClient,
    unpacker: Box<dyn Unpacker + 'a>,
    checker: Box<dyn AuthenticityChecker + 'a>,
    hooks: Box<dyn ActivationHook + 'a>,
    cleanup: SharedCleanupContext,
}

impl<'a, R: Runtime> Installer<'a, R> {
    /// An installer that unpacks tar.gz archives, checks SHA-512 digests and
    /// runs no activation hooks.
    pub fn new(store: &'a VersionStore<'a, R>, catalog: &'a dyn Catalog, http: &'a HttpClient) -> Self {
        let runtime = store.runtime();
        Self {
            runtime,
            store,
            catalog,
            http,
            unpacker: Box::new(TarGzUnpacker),
            checker: Box::new(DigestChecker::new(runtime)),
            hooks: Box::new(NoHooks),
            cleanup: new_shared(),
        }
    }

    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker + 'a>) -> Self {
        self.unpacker = unpacker;
        self
    }

    pub fn with_checker(mut self, checker: Box<dyn AuthenticityChecker + 'a>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn ActivationHook + 'a>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Shares the staging paths with a Ctrl-C handler.
    pub fn with_cleanup(mut self, cleanup: SharedCleanupContext) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn store(&self) -> &'a VersionStore<'a, R> {
        self.store
    }

    pub fn http(&self) -> &'a HttpClient {
        self.http
    }

    pub fn cleanup(&self) -> SharedCleanupContext {
        self.cleanup.clone()
    }

    /// Installs a local package file or a `name[.origin]` catalog package and
    /// returns the package name.
    #[tracing::instrument(skip(self, progress))]
    pub async fn install(
        &self,
        reference: &str,
        flags: InstallFlags,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let package = PackageRef::parse(self.runtime, reference)?;
        let outcome = self.install_ref(&package, flags, progress).await?;
        Ok(outcome.id.name)
    }

    /// Runs the install state machine for an already parsed reference.
    pub async fn install_ref(
        &self,
        package: &PackageRef,
        flags: InstallFlags,
        progress: &dyn ProgressSink,
    ) -> Result<InstallOutcome> {
        let label = match package {
            PackageRef::Local(path) => path.display().to_string(),
            PackageRef::Remote { .. } => package.catalog_key().unwrap_or_default(),
        };
        let mut run = InstallRun::new(label.clone());

        match self.drive(&mut run, package, flags, progress).await {
            Ok(mut outcome) => {
                run.advance(InstallState::Done);
                outcome.states = run.history().to_vec();
                Ok(outcome)
            }
            Err(e) => {
                let failed_while = run.state();
                run.advance(InstallState::Failed);
                Err(e.context(format!("Failed to install {} while {}", label, failed_while)))
            }
        }
    }

    async fn drive(
        &self,
        run: &mut InstallRun,
        package: &PackageRef,
        flags: InstallFlags,
        progress: &dyn ProgressSink,
    ) -> Result<InstallOutcome> {
        // An explicit origin allows the name check before any network I/O
        if let PackageRef::Remote {
            name,
            origin: Some(origin),
        } = package
        {
            self.check_name_available(&PackageIdentity::new(name, origin))?;
        }

        let resolved = self.resolve(package).await?;
        let id = &resolved.id;
        let version = resolved.version.as_str();

        let _lock = self.store.lock(id)?;
        self.check_name_available(id)?;
        self.check_not_current(id, version)?;

        run.advance(InstallState::Fetching);
        let staged = self.fetch(&resolved, progress).await?;

        run.advance(InstallState::Verifying);
        self.verify(&resolved, &staged, flags)?;

        run.advance(InstallState::Placing);
        let previous = self.store.current_version(id);
        let (path, reused) = match self.store.place(id, version, |dir| self.fill(&staged, dir)) {
            Ok(path) => (path, false),
            Err(e) if matches!(snap_error(&e), Some(SnapError::AlreadyPlaced { .. })) => {
                info!("{} {} is already placed", id, version);
                (self.store.version_dir(id, version), true)
            }
            Err(e) => return Err(e),
        };
        drop(staged);

        if previous.as_deref() == Some(version) {
            // Became current through another install while this one waited
            return Ok(self.outcome(id, version, path, reused, None));
        }

        run.advance(InstallState::Promoting);
        self.store.promote(id, version)?;
        let migrated = match &previous {
            Some(previous) => self
                .store
                .migrate_user_data(id, previous, version)
                .unwrap_or_else(|e| {
                    warn!("Failed to migrate user data of {}: {:#}", id, e);
                    vec![]
                }),
            None => vec![],
        };

        if flags.inhibit_hooks() {
            debug!("Activation hooks inhibited for {}", id);
        } else {
            run.advance(InstallState::Activating);
            if let Err(e) = self.hooks.activate(id, version, &path, progress) {
                run.advance(InstallState::RollingBack);
                let reason = match self.roll_back(id, version, previous.as_deref(), reused, &migrated) {
                    Ok(()) => format!("{:#}", e),
                    Err(rollback) => format!("{:#}; rollback failed: {:#}", e, rollback),
                };
                return Err(SnapError::ActivationFailed {
                    name: id.name.clone(),
                    version: version.to_string(),
                    reason,
                }
                .into());
            }
        }

        info!("Installed {} {}", id, version);

        let gc = flags.do_gc().then(|| {
            let report = gc::collect(self.store, id);
            if !report.is_clean() {
                warn!(
                    "{} old version(s) of {} could not be removed",
                    report.failures.len(),
                    id
                );
            }
            report
        });

        Ok(self.outcome(id, version, path, reused, gc))
    }

    fn outcome(
        &self,
        id: &PackageIdentity,
        version: &str,
        path: PathBuf,
        reused: bool,
        gc: Option<GcReport>,
    ) -> InstallOutcome {
        InstallOutcome {
            id: id.clone(),
            version: version.to_string(),
            path,
            reused,
            gc,
            states: vec![],
        }
    }

    /// Names are unique across origins.
    fn check_name_available(&self, id: &PackageIdentity) -> Result<()> {
        if let Some(other) = self
            .store
            .installed_by_name(&id.name)?
            .into_iter()
            .find(|p| p.id.origin != id.origin)
        {
            return Err(SnapError::PackageNameAlreadyInstalled {
                name: id.name.clone(),
                installed_origin: other.id.origin,
            }
            .into());
        }
        Ok(())
    }

    fn check_not_current(&self, id: &PackageIdentity, version: &str) -> Result<()> {
        if self.store.current_version(id).as_deref() == Some(version) {
            return Err(SnapError::AlreadyInstalled {
                name: id.name.clone(),
                version: version.to_string(),
            }
            .into());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn resolve(&self, package: &PackageRef) -> Result<Resolved> {
        match package {
            PackageRef::Local(path) => {
                let manifest = self.unpacker.manifest(self.runtime, path)?;
                debug!("{:?} is {} {}", path, manifest.name, manifest.version);
                Ok(Resolved {
                    id: PackageIdentity::new(&manifest.name, SIDELOAD_ORIGIN),
                    version: manifest.version,
                    source: Source::Local(path.clone()),
                })
            }
            PackageRef::Remote { name, origin } => {
                let entry = self.catalog.details(name, origin.clone()).await?;
                if entry.name != *name {
                    return Err(SnapError::CatalogError(format!(
                        "asked for {} but the catalog answered {}",
                        name, entry.name
                    ))
                    .into());
                }
                validate_name(&entry.name)
                    .and_then(|_| validate_origin(&entry.origin))
                    .and_then(|_| validate_version(&entry.version))
                    .map_err(|e| SnapError::CatalogError(e.to_string()))?;
                Ok(Resolved {
                    id: entry.identity(),
                    version: entry.version.clone(),
                    source: Source::Catalog(entry),
                })
            }
        }
    }

    async fn fetch(&self, resolved: &Resolved, progress: &dyn ProgressSink) -> Result<Staged> {
        let entry = match &resolved.source {
            Source::Local(path) => {
                return Ok(Staged {
                    content: StagedContent {
                        path: path.clone(),
                        expected_sha512: None,
                    },
                    icon: None,
                    _download: None,
                });
            }
            Source::Catalog(entry) => entry,
        };

        let staging = self.store.staging_root();
        self.runtime
            .create_dir_all(&staging)
            .with_context(|| format!("Failed to create staging directory {:?}", staging))?;
        let stem = format!("{}_{}", resolved.id.dir_name(), resolved.version);

        let download = StagingGuard::new(self.cleanup(), staging.join(format!("{}.snap", stem)));
        download_file(
            self.runtime,
            self.http,
            &entry.anon_download_url,
            download.path(),
            progress,
        )
        .await?;

        let icon = match entry.icon_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => {
                let icon = StagingGuard::new(self.cleanup(), staging.join(format!("{}.icon", stem)));
                match download_file(self.runtime, self.http, url, icon.path(), &NullProgress).await {
                    Ok(_) => Some(icon),
                    Err(e) => {
                        warn!("Failed to fetch icon for {}: {:#}", resolved.id, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Staged {
            content: StagedContent {
                path: download.path().to_path_buf(),
                expected_sha512: entry.download_sha512.clone(),
            },
            icon,
            _download: Some(download),
        })
    }

    fn verify(&self, resolved: &Resolved, staged: &Staged, flags: InstallFlags) -> Result<()> {
        if flags.allow_unauthenticated() {
            debug!("Skipping authenticity check for {}", resolved.id);
        } else {
            self.checker.verify(&staged.content)?;
        }

        if let Source::Catalog(_) = resolved.source {
            let manifest = self.unpacker.manifest(self.runtime, &staged.content.path)?;
            if manifest.name != resolved.id.name || manifest.version != resolved.version {
                return Err(SnapError::VerificationFailed(format!(
                    "download is {} {}, expected {} {}",
                    manifest.name, manifest.version, resolved.id.name, resolved.version
                ))
                .into());
            }
        }
        Ok(())
    }

    fn fill(&self, staged: &Staged, dir: &Path) -> Result<()> {
        self.unpacker.unpack(self.runtime, &staged.content.path, dir)?;

        if let Some(icon) = &staged.icon {
            let dest = dir.join(ICON_PATH);
            let copied = dest
                .parent()
                .map_or(Ok(()), |parent| self.runtime.create_dir_all(parent))
                .and_then(|_| self.runtime.copy(icon.path(), &dest));
            if let Err(e) = copied {
                warn!("Failed to place icon: {:#}", e);
            }
        }
        Ok(())
    }

    /// Restores the previous current version (or no current version), drops
    /// user data copied for the new version and the new version directory.
    fn roll_back(
        &self,
        id: &PackageIdentity,
        version: &str,
        previous: Option<&str>,
        reused: bool,
        migrated: &[PathBuf],
    ) -> Result<()> {
        warn!("Activation of {} {} failed, rolling back", id, version);

        match previous {
            Some(previous) => self.store.promote(id, previous)?,
            None => self
                .runtime
                .remove_symlink(&self.store.current_link(id))
                .context("Failed to remove current marker")?,
        }

        for path in migrated {
            if let Err(e) = self.runtime.remove_dir_all(path) {
                warn!("Failed to remove copied user data {:?}: {:#}", path, e);
            }
        }

        if !reused && let Err(e) = self.store.remove(id, version) {
            warn!("Failed to remove {} {}: {:#}", id, version, e);
        }
        Ok(())
    }
}
