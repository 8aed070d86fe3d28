use anyhow::Result;
use log::debug;

use crate::config::{ConfigOptions, DEFAULT_HOME_ROOT, default_apps_root};
use crate::runtime::Runtime;
use crate::store::{HomeRootUsers, InstalledPackage, VersionStore};

/// List all installed packages with their current version
#[tracing::instrument(skip(runtime, options))]
pub fn list<R: Runtime>(runtime: R, options: ConfigOptions) -> Result<()> {
    for line in installed_lines(&runtime, options)? {
        println!("{}", line);
    }
    Ok(())
}

fn installed_lines<R: Runtime>(runtime: &R, options: ConfigOptions) -> Result<Vec<String>> {
    let apps_root = match options.apps_root {
        Some(path) => path,
        None => default_apps_root(runtime)?,
    };
    let home_root = options.home_root.unwrap_or_else(|| DEFAULT_HOME_ROOT.into());
    debug!("Listing packages from {:?}", apps_root);

    let users = HomeRootUsers::new(runtime, home_root);
    let store = VersionStore::new(runtime, apps_root, &users);
    let installed = store.installed()?;
    if installed.is_empty() {
        return Ok(vec!["No packages installed.".to_string()]);
    }
    Ok(installed.iter().map(format_package).collect())
}

fn format_package(package: &InstalledPackage) -> String {
    format!("{} {}", package.id, package.version)
}
