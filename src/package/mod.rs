//! Package identity, references and the manifest carried by package archives.

mod identity;
mod manifest;

pub use identity::{PackageIdentity, PackageRef, SIDELOAD_ORIGIN};
pub use manifest::{MANIFEST_PATH, PackageManifest, validate_name, validate_origin, validate_version};
