use anyhow::Result;
use log::warn;

use super::{http_client, spawn_interrupt_handler};
use crate::archive::TarGzUnpacker;
use crate::catalog::CatalogClient;
use crate::cleanup::new_shared;
use crate::config::{Config, ConfigOptions};
use crate::flags::InstallFlags;
use crate::installer::Installer;
use crate::partition::{DirPartition, Partition};
use crate::progress::LogProgress;
use crate::runtime::Runtime;
use crate::store::{HomeRootUsers, VersionStore};
use crate::sysimage::SystemImageIndex;
use crate::updater::{SystemImageStatus, SystemImageUpdate, UpdateReport, Updater};

#[tracing::instrument(skip(runtime, options))]
pub async fn update<R: Runtime>(
    runtime: R,
    flags: InstallFlags,
    options: ConfigOptions,
) -> Result<()> {
    let config = Config::new(&runtime, options)?;
    let users = HomeRootUsers::new(&runtime, config.home_root.clone());
    let store = VersionStore::new(&runtime, config.apps_root.clone(), &users);
    let http = http_client(&config);
    let catalog = CatalogClient::new(http.clone(), &config.details_url, &config.bulk_url);

    let cleanup_ctx = new_shared();
    let installer = Installer::new(&store, &catalog, &http).with_cleanup(cleanup_ctx.clone());

    let system_image = config.system_image.as_ref().map(|si| {
        (
            SystemImageIndex::new(http.clone(), &si.server),
            DirPartition::new(&runtime, si.root.clone(), TarGzUnpacker),
            si.channel.clone(),
        )
    });
    let mut updater = Updater::new(&installer, &catalog);
    if let Some((index, partition, channel)) = &system_image {
        // Without a configured channel, follow the one the active slot runs
        let channel = match channel {
            Some(channel) => Some(channel.clone()),
            None => match partition.active_slot() {
                Ok(slot) => Some(slot.descriptor.channel),
                Err(e) => {
                    warn!("Cannot determine system image channel: {:#}", e);
                    None
                }
            },
        };
        if let Some(channel) = channel.filter(|c| !c.is_empty()) {
            updater = updater.with_system_image(SystemImageUpdate {
                index,
                partition,
                channel,
            });
        }
    }

    let ctrl_c_handler = spawn_interrupt_handler(cleanup_ctx);
    let result = updater.update(flags, &LogProgress::new()).await;
    ctrl_c_handler.abort();

    print_report(&result?);
    Ok(())
}

fn print_report(report: &UpdateReport) {
    if report.packages.is_empty() {
        println!("All packages are up to date.");
    }
    for package in &report.packages {
        println!(
            "  updated {}.{} to {}",
            package.name, package.origin, package.version
        );
    }

    match &report.system_image {
        SystemImageStatus::NotConfigured => {}
        SystemImageStatus::UpToDate(build) => {
            println!("System image is up to date (build {}).", build)
        }
        SystemImageStatus::Staged { slot, build } => println!(
            "System image build {} staged in slot {}; reboot to use it.",
            build, slot
        ),
        SystemImageStatus::Failed(reason) => {
            eprintln!("System image update failed: {}", reason)
        }
    }
}
