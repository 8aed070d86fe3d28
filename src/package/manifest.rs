use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Path of the manifest inside a package archive.
pub const MANIFEST_PATH: &str = "meta/package.json";

/// Package metadata shipped inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl PackageManifest {
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: PackageManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_version(&self.version)
    }
}

/// Names become directory names and the part before the origin dot.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '.']) || name.starts_with('-') {
        bail!("Invalid package name {:?}", name);
    }
    Ok(())
}

/// Origins follow the last dot of `<name>.<origin>` directory names, so they
/// cannot hold a dot themselves.
pub fn validate_origin(origin: &str) -> Result<()> {
    if origin.is_empty() || origin.contains(['/', '.']) || origin.starts_with('-') {
        bail!("Invalid package origin {:?}", origin);
    }
    Ok(())
}

/// Versions become directory names next to the `current` marker.
pub fn validate_version(version: &str) -> Result<()> {
    if version.is_empty()
        || version.contains('/')
        || version.starts_with('.')
        || version == "current"
    {
        bail!("Invalid package version {:?}", version);
    }
    Ok(())
}
