//! Host-wide reconciliation against the catalog and the system-image index.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::cleanup::StagingGuard;
use crate::error::{PackageFailure, SnapError};
use crate::flags::InstallFlags;
use crate::installer::Installer;
use crate::package::{PackageIdentity, PackageRef};
use crate::partition::{Partition, SlotDescriptor, SlotLabel};
use crate::progress::ProgressSink;
use crate::runtime::Runtime;
use crate::sysimage::SystemImageIndex;

/// A package the update moved to a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedPackage {
    pub name: String,
    pub origin: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemImageStatus {
    /// No system-image root configured
    NotConfigured,
    /// The active slot already runs this build
    UpToDate(u64),
    /// A new build was written to `slot` and will boot next
    Staged { slot: SlotLabel, build: u64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub packages: Vec<UpdatedPackage>,
    pub system_image: SystemImageStatus,
}

/// What the updater needs to move the system image forward.
pub struct SystemImageUpdate<'a> {
    pub index: &'a SystemImageIndex,
    pub partition: &'a dyn Partition,
    pub channel: String,
}

pub struct Updater<'a, R: Runtime> {
    installer: &'a Installer<'a, R>,
    catalog: &'a dyn Catalog,
    system_image: Option<SystemImageUpdate<'a>>,
}

impl<'a, R: Runtime> Updater<'a, R> {
    pub fn new(installer: &'a Installer<'a, R>, catalog: &'a dyn Catalog) -> Self {
        Self {
            installer,
            catalog,
            system_image: None,
        }
    }

    pub fn with_system_image(mut self, system_image: SystemImageUpdate<'a>) -> Self {
        self.system_image = Some(system_image);
        self
    }

    /// Updates every outdated package, then the system image. Fails with
    /// `PartialUpdateFailure` if any package could not be updated.
    #[tracing::instrument(skip(self, progress))]
    pub async fn update(
        &self,
        flags: InstallFlags,
        progress: &dyn ProgressSink,
    ) -> Result<UpdateReport> {
        let store = self.installer.store();
        let installed = store.installed()?;
        debug!("{} package(s) installed", installed.len());

        let entries = self.catalog.bulk_status(&installed).await?;
        let installed_versions: HashMap<&PackageIdentity, &str> = installed
            .iter()
            .map(|p| (&p.id, p.version.as_str()))
            .collect();

        let mut packages = Vec::new();
        let mut failures = Vec::new();
        for entry in &entries {
            let id = entry.identity();
            let Some(current) = installed_versions.get(&id) else {
                debug!("Ignoring catalog entry for {}: not installed", id);
                continue;
            };
            if *current == entry.version {
                debug!("{} is up to date at {}", id, current);
                continue;
            }

            info!("Updating {} from {} to {}", id, current, entry.version);
            let package = PackageRef::Remote {
                name: id.name.clone(),
                origin: Some(id.origin.clone()),
            };
            match self.installer.install_ref(&package, flags, progress).await {
                Ok(outcome) => packages.push(UpdatedPackage {
                    name: outcome.id.name,
                    origin: outcome.id.origin,
                    version: outcome.version,
                }),
                Err(e) => {
                    warn!("Failed to update {}: {:#}", id, e);
                    failures.push(PackageFailure {
                        package: id.to_string(),
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        let system_image = match &self.system_image {
            Some(update) => match self.update_system_image(update, progress).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("System image update failed: {:#}", e);
                    SystemImageStatus::Failed(format!("{:#}", e))
                }
            },
            None => SystemImageStatus::NotConfigured,
        };

        let report = UpdateReport {
            packages,
            system_image,
        };
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(SnapError::PartialUpdateFailure { report, failures }.into())
        }
    }

    /// Stages the newest full build into the inactive slot when the active
    /// slot runs something else.
    #[tracing::instrument(skip(self, update, progress))]
    async fn update_system_image(
        &self,
        update: &SystemImageUpdate<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<SystemImageStatus> {
        let active = update.partition.active_slot()?;
        let Some(latest) = update.index.latest(&update.channel).await? else {
            debug!("Channel {} has no full images", update.channel);
            return Ok(SystemImageStatus::UpToDate(active.descriptor.build_number));
        };
        if latest.version == active.descriptor.build_number {
            return Ok(SystemImageStatus::UpToDate(latest.version));
        }

        let inactive = update.partition.inactive_slot()?;
        let descriptor = SlotDescriptor::new(&update.channel, latest.version);
        if inactive.descriptor == descriptor {
            debug!(
                "Slot {} already holds build {}",
                inactive.label, latest.version
            );
        } else {
            let store = self.installer.store();
            let staging = store.staging_root();
            store
                .runtime()
                .create_dir_all(&staging)
                .with_context(|| format!("Failed to create staging directory {:?}", staging))?;

            let download = StagingGuard::new(
                self.installer.cleanup(),
                staging.join(format!("system-image-{}", latest.version)),
            );
            update
                .index
                .download(store.runtime(), &latest, download.path(), progress)
                .await?;
            update
                .partition
                .stage_image(&inactive, download.path(), &descriptor)?;
        }

        update.partition.mark_bootable(&inactive)?;
        info!(
            "System image build {} staged into slot {}",
            latest.version, inactive.label
        );
        Ok(SystemImageStatus::Staged {
            slot: inactive.label,
            build: latest.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TarGzUnpacker;
    use crate::catalog::{CatalogEntry, MockCatalog};
    use crate::error::snap_error;
    use crate::http::HttpClient;
    use crate::partition::{CHANNEL_CONFIG_PATH, DirPartition, MockPartition, PartitionSlot};
    use crate::progress::NullProgress;
    use crate::runtime::RealRuntime;
    use crate::store::{UserDirectory, UserHandle, VersionStore};
    use crate::test_utils::{sha512_hex, snap_archive};
    use reqwest::Client;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    struct NoUsers;

    impl UserDirectory for NoUsers {
        fn list_users(&self) -> Result<Vec<UserHandle>> {
            Ok(vec![])
        }
    }

    const UNAUTH: InstallFlags = InstallFlags::ALLOW_UNAUTHENTICATED;

    fn http() -> HttpClient {
        HttpClient::new(Client::new()).with_retry_delay_ms(1)
    }

    fn remote(name: &str, origin: &str, version: &str, url: String, archive: &Path) -> CatalogEntry {
        CatalogEntry {
            name: name.into(),
            origin: origin.into(),
            version: version.into(),
            anon_download_url: url,
            icon_url: None,
            download_sha512: Some(sha512_hex(archive)),
        }
    }

    fn write_slot(root: &Path, label: &str, build: u64) {
        let config = root.join(label).join(CHANNEL_CONFIG_PATH);
        fs::create_dir_all(config.parent().unwrap()).unwrap();
        fs::write(config, SlotDescriptor::new("stable", build).to_ini()).unwrap();
    }

    fn image_index(build: u64) -> String {
        format!(
            r#"{{"images": [{{"type": "full", "version": {}, "files": [{{"path": "/pool/image.tar.gz", "order": 0}}]}}]}}"#,
            build
        )
    }

    #[tokio::test]
    async fn test_update_installs_newer_catalog_version() {
        let dir = tempdir().unwrap();
        let v1 = snap_archive(dir.path(), "foo", "1");
        let v2 = snap_archive(dir.path(), "foo", "2");

        let mut server = mockito::Server::new_async().await;
        let _dl = server
            .mock("GET", "/dl")
            .with_status(200)
            .with_body(fs::read(&v2).unwrap())
            .create_async()
            .await;
        let entry = remote("foo", "sideload", "2", format!("{}/dl", server.url()), &v2);

        let mut catalog = MockCatalog::new();
        let bulk_entry = entry.clone();
        catalog
            .expect_bulk_status()
            .withf(|installed| installed.len() == 1 && installed[0].version == "1")
            .times(1)
            .returning(move |_| Ok(vec![bulk_entry.clone()]));
        catalog
            .expect_details()
            .withf(|name, origin| name == "foo" && origin.as_deref() == Some("sideload"))
            .times(1)
            .returning(move |_, _| Ok(entry.clone()));

        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        installer
            .install(v1.to_str().unwrap(), UNAUTH | InstallFlags::DO_INSTALL_GC, &NullProgress)
            .await
            .unwrap();

        let report = Updater::new(&installer, &catalog)
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(
            report.packages,
            vec![UpdatedPackage {
                name: "foo".into(),
                origin: "sideload".into(),
                version: "2".into(),
            }]
        );
        assert_eq!(report.system_image, SystemImageStatus::NotConfigured);
        let id = PackageIdentity::new("foo", "sideload");
        assert_eq!(store.current(&id).unwrap().version, "2");
    }

    #[tokio::test]
    async fn test_nothing_outdated_returns_empty_report() {
        let dir = tempdir().unwrap();
        let v1 = snap_archive(dir.path(), "foo", "1");
        let same = remote("foo", "sideload", "1", "http://unused/dl".into(), &v1);

        let mut catalog = MockCatalog::new();
        catalog
            .expect_bulk_status()
            .returning(move |_| Ok(vec![same.clone()]));

        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        installer
            .install(v1.to_str().unwrap(), UNAUTH, &NullProgress)
            .await
            .unwrap();

        let report = Updater::new(&installer, &catalog)
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap();
        assert!(report.packages.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_one_failure_does_not_stop_the_others() {
        let dir = tempdir().unwrap();
        let foo1 = snap_archive(dir.path(), "foo", "1");
        let bar1 = snap_archive(dir.path(), "bar", "1");
        let bar2 = snap_archive(dir.path(), "bar", "2");

        let mut server = mockito::Server::new_async().await;
        let _bar = server
            .mock("GET", "/bar")
            .with_status(200)
            .with_body(fs::read(&bar2).unwrap())
            .create_async()
            .await;
        let _foo = server
            .mock("GET", "/foo")
            .with_status(404)
            .create_async()
            .await;

        let foo_entry = remote("foo", "sideload", "2", format!("{}/foo", server.url()), &foo1);
        let bar_entry = remote("bar", "sideload", "2", format!("{}/bar", server.url()), &bar2);
        let bulk = vec![foo_entry.clone(), bar_entry.clone()];

        let mut catalog = MockCatalog::new();
        catalog
            .expect_bulk_status()
            .returning(move |_| Ok(bulk.clone()));
        catalog.expect_details().returning(move |name, _| {
            Ok(if name == "foo" {
                foo_entry.clone()
            } else {
                bar_entry.clone()
            })
        });

        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        for archive in [&foo1, &bar1] {
            installer
                .install(archive.to_str().unwrap(), UNAUTH, &NullProgress)
                .await
                .unwrap();
        }

        let err = Updater::new(&installer, &catalog)
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap_err();

        match snap_error(&err) {
            Some(SnapError::PartialUpdateFailure { report, failures }) => {
                assert_eq!(report.packages.len(), 1);
                assert_eq!(report.packages[0].name, "bar");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].package, "foo.sideload");
            }
            other => panic!("unexpected error {:?}", other),
        }
        let foo = PackageIdentity::new("foo", "sideload");
        assert_eq!(store.current(&foo).unwrap().version, "1");
        let bar = PackageIdentity::new("bar", "sideload");
        assert_eq!(store.current(&bar).unwrap().version, "2");
    }

    #[tokio::test]
    async fn test_catalog_failure_changes_nothing() {
        let dir = tempdir().unwrap();
        let v1 = snap_archive(dir.path(), "foo", "1");
        let mut catalog = MockCatalog::new();
        catalog
            .expect_bulk_status()
            .returning(|_| Err(SnapError::CatalogError("bad gateway".into()).into()));

        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        installer
            .install(v1.to_str().unwrap(), UNAUTH, &NullProgress)
            .await
            .unwrap();

        let err = Updater::new(&installer, &catalog)
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap_err();
        assert!(matches!(snap_error(&err), Some(SnapError::CatalogError(_))));
    }

    #[tokio::test]
    async fn test_system_image_staged_into_inactive_slot() {
        let dir = tempdir().unwrap();
        let si_root = dir.path().join("system-image");
        write_slot(&si_root, "a", 1);
        write_slot(&si_root, "b", 1);
        fs::write(si_root.join("active"), "a").unwrap();

        let image_dir = tempdir().unwrap();
        let image = snap_archive(image_dir.path(), "core", "2");

        let mut server = mockito::Server::new_async().await;
        let _index = server
            .mock("GET", "/stable/index.json")
            .with_status(200)
            .with_body(image_index(2))
            .create_async()
            .await;
        let _payload = server
            .mock("GET", "/pool/image.tar.gz")
            .with_status(200)
            .with_body(fs::read(&image).unwrap())
            .create_async()
            .await;

        let mut catalog = MockCatalog::new();
        catalog.expect_bulk_status().returning(|_| Ok(vec![]));

        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        let index = SystemImageIndex::new(http.clone(), server.url());
        let partition = DirPartition::new(&runtime, si_root.clone(), TarGzUnpacker);

        let report = Updater::new(&installer, &catalog)
            .with_system_image(SystemImageUpdate {
                index: &index,
                partition: &partition,
                channel: "stable".into(),
            })
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap();

        assert!(report.packages.is_empty());
        assert_eq!(
            report.system_image,
            SystemImageStatus::Staged {
                slot: SlotLabel::B,
                build: 2
            }
        );
        assert_eq!(partition.active_slot().unwrap().descriptor.build_number, 1);
        assert_eq!(partition.inactive_slot().unwrap().descriptor.build_number, 2);
        assert_eq!(partition.next_boot().unwrap(), SlotLabel::B);
        assert!(si_root.join("b/meta/package.json").exists());
    }

    #[tokio::test]
    async fn test_system_image_up_to_date() {
        let mut server = mockito::Server::new_async().await;
        let _index = server
            .mock("GET", "/stable/index.json")
            .with_status(200)
            .with_body(image_index(1))
            .create_async()
            .await;

        let mut partition = MockPartition::new();
        partition.expect_active_slot().returning(|| {
            Ok(PartitionSlot {
                label: SlotLabel::A,
                descriptor: SlotDescriptor::new("stable", 1),
            })
        });
        partition.expect_stage_image().never();
        partition.expect_mark_bootable().never();

        let dir = tempdir().unwrap();
        let mut catalog = MockCatalog::new();
        catalog.expect_bulk_status().returning(|_| Ok(vec![]));
        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        let index = SystemImageIndex::new(http.clone(), server.url());

        let report = Updater::new(&installer, &catalog)
            .with_system_image(SystemImageUpdate {
                index: &index,
                partition: &partition,
                channel: "stable".into(),
            })
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(report.system_image, SystemImageStatus::UpToDate(1));
    }

    #[tokio::test]
    async fn test_system_image_failure_is_reported_separately() {
        let mut server = mockito::Server::new_async().await;
        let _index = server
            .mock("GET", "/stable/index.json")
            .with_status(200)
            .with_body(image_index(2))
            .create_async()
            .await;
        let _payload = server
            .mock("GET", "/pool/image.tar.gz")
            .with_status(200)
            .with_body("image")
            .create_async()
            .await;

        let mut partition = MockPartition::new();
        partition.expect_active_slot().returning(|| {
            Ok(PartitionSlot {
                label: SlotLabel::A,
                descriptor: SlotDescriptor::new("stable", 1),
            })
        });
        partition.expect_inactive_slot().returning(|| {
            Ok(PartitionSlot {
                label: SlotLabel::B,
                descriptor: SlotDescriptor::new("stable", 1),
            })
        });
        partition
            .expect_stage_image()
            .returning(|_, _, _| Err(anyhow::anyhow!("device busy")));
        partition.expect_mark_bootable().never();

        let dir = tempdir().unwrap();
        let mut catalog = MockCatalog::new();
        catalog.expect_bulk_status().returning(|_| Ok(vec![]));
        let runtime = RealRuntime;
        let store = VersionStore::new(&runtime, dir.path().join("apps"), &NoUsers);
        let http = http();
        let installer = Installer::new(&store, &catalog, &http);
        let index = SystemImageIndex::new(http.clone(), server.url());

        let report = Updater::new(&installer, &catalog)
            .with_system_image(SystemImageUpdate {
                index: &index,
                partition: &partition,
                channel: "stable".into(),
            })
            .update(InstallFlags::empty(), &NullProgress)
            .await
            .unwrap();

        assert!(matches!(
            report.system_image,
            SystemImageStatus::Failed(msg) if msg.contains("device busy")
        ));
        // The staged download was discarded
        let staging: PathBuf = store.staging_root();
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
    }
}
