use anyhow::Result;

use crate::config::{ConfigOptions, DEFAULT_HOME_ROOT, default_apps_root};
use crate::package::PackageIdentity;
use crate::runtime::Runtime;
use crate::store::{HomeRootUsers, VersionStore};

/// Show every placed version of one package, oldest first
#[tracing::instrument(skip(runtime, options))]
pub fn versions<R: Runtime>(runtime: R, package: &str, options: ConfigOptions) -> Result<()> {
    for line in version_lines(&runtime, package, options)? {
        println!("{}", line);
    }
    Ok(())
}

fn version_lines<R: Runtime>(
    runtime: &R,
    package: &str,
    options: ConfigOptions,
) -> Result<Vec<String>> {
    let id: PackageIdentity = package.parse()?;
    let apps_root = match options.apps_root {
        Some(path) => path,
        None => default_apps_root(runtime)?,
    };
    let home_root = options.home_root.unwrap_or_else(|| DEFAULT_HOME_ROOT.into());

    let users = HomeRootUsers::new(runtime, home_root);
    let store = VersionStore::new(runtime, apps_root, &users);
    let versions = store.versions(&id)?;
    if versions.is_empty() {
        return Ok(vec![format!("{} is not installed.", id)]);
    }

    Ok(versions
        .into_iter()
        .map(|v| {
            let marker = if v.active { "*" } else { " " };
            format!("{} {}", marker, v.version)
        })
        .collect())
}
