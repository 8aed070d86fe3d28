use anyhow::{Context, Result, anyhow, bail};
use flate2::read::GzDecoder;
use log::{debug, warn};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use super::Unpacker;
use crate::package::{MANIFEST_PATH, PackageManifest};
use crate::runtime::Runtime;

/// Unpacker for gzip-compressed tar package archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzUnpacker;

impl TarGzUnpacker {
    fn open_archive(
        runtime: &dyn Runtime,
        archive: &Path,
    ) -> Result<Archive<GzDecoder<Box<dyn Read + Send>>>> {
        let file = runtime
            .open(archive)
            .with_context(|| format!("Failed to open archive at {:?}", archive))?;
        Ok(Archive::new(GzDecoder::new(file)))
    }
}

/// Strips `./` prefixes and rejects anything that would land outside the
/// destination directory.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => bail!("Archive entry {:?} escapes the package directory", path),
        }
    }
    Ok(clean)
}

impl Unpacker for TarGzUnpacker {
    #[tracing::instrument(skip(self, runtime))]
    fn manifest(&self, runtime: &dyn Runtime, archive: &Path) -> Result<PackageManifest> {
        let mut tar = Self::open_archive(runtime, archive)?;

        for entry in tar.entries().context("Failed to read archive entries")? {
            let mut entry = entry.context("Failed to read archive entry")?;
            let path = sanitize_entry_path(&entry.path()?)?;
            if path == Path::new(MANIFEST_PATH) {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .context("Failed to read package manifest")?;
                return PackageManifest::parse(&content)
                    .with_context(|| format!("Invalid manifest in {:?}", archive));
            }
        }

        Err(anyhow!("{:?} has no {}", archive, MANIFEST_PATH))
    }

    #[tracing::instrument(skip(self, runtime))]
    fn unpack(&self, runtime: &dyn Runtime, archive: &Path, dest: &Path) -> Result<()> {
        debug!("Unpacking {:?} into {:?}", archive, dest);
        let mut tar = Self::open_archive(runtime, archive)?;

        for entry in tar.entries().context("Failed to read archive entries")? {
            let mut entry = entry.context("Failed to read archive entry")?;
            let relative = sanitize_entry_path(&entry.path()?)?;
            if relative.as_os_str().is_empty() {
                continue;
            }
            let target = dest.join(&relative);

            match entry.header().entry_type() {
                EntryType::Directory => runtime.create_dir_all(&target)?,
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = target.parent() {
                        runtime.create_dir_all(parent)?;
                    }
                    let mut writer = runtime.create_file(&target)?;
                    std::io::copy(&mut entry, &mut writer)
                        .with_context(|| format!("Failed to write {:?}", target))?;
                    drop(writer);
                    if let Ok(mode) = entry.header().mode() {
                        runtime.set_permissions(&target, mode & 0o777)?;
                    }
                }
                other => {
                    warn!("Skipping unsupported archive entry {:?} ({:?})", relative, other);
                }
            }
        }

        Ok(())
    }
}
