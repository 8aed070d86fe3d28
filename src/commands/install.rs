use anyhow::Result;

use super::{http_client, spawn_interrupt_handler};
use crate::catalog::CatalogClient;
use crate::cleanup::new_shared;
use crate::config::{Config, ConfigOptions};
use crate::flags::InstallFlags;
use crate::installer::Installer;
use crate::progress::LogProgress;
use crate::runtime::Runtime;
use crate::store::{HomeRootUsers, VersionStore};

#[tracing::instrument(skip(runtime, options))]
pub async fn install<R: Runtime>(
    runtime: R,
    reference: &str,
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

    println!("  installing {}", reference);
    let ctrl_c_handler = spawn_interrupt_handler(cleanup_ctx);
    let result = installer.install(reference, flags, &LogProgress::new()).await;
    ctrl_c_handler.abort();

    let name = result?;
    println!("  installed {}", name);
    Ok(())
}
