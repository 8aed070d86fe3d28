//! Package archive handling.
//!
//! Archives are consumed through the [`Unpacker`] trait; the installer never
//! looks inside an archive itself.

mod tar_gz;

use anyhow::Result;
use std::path::Path;

use crate::package::PackageManifest;
use crate::runtime::Runtime;

pub use tar_gz::TarGzUnpacker;

pub trait Unpacker: Send + Sync {
    /// Read the manifest without writing anything to disk.
    fn manifest(&self, runtime: &dyn Runtime, archive: &Path) -> Result<PackageManifest>;

    /// Unpack the archive contents into `dest`, which must already exist.
    fn unpack(&self, runtime: &dyn Runtime, archive: &Path, dest: &Path) -> Result<()>;
}
