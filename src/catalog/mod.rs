//! Read-only lookups against the remote package catalog.

mod client;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::package::PackageIdentity;
use crate::store::InstalledPackage;

pub use client::CatalogClient;

/// One package version as the catalog describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "package_name", default)]
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub anon_download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Hex SHA-512 of the download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_sha512: Option<String>,
}

impl CatalogEntry {
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.name, &self.origin)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Latest entry for `name`, restricted to `origin` when given. Fails with
    /// `NotFound` if the catalog has no such package.
    async fn details(&self, name: &str, origin: Option<String>) -> Result<CatalogEntry>;

    /// Latest known entry for each installed package, in one round trip.
    /// Packages the catalog knows nothing newer about may be absent.
    async fn bulk_status(&self, installed: &[InstalledPackage]) -> Result<Vec<CatalogEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_parses_wire_names() {
        let entry: CatalogEntry = serde_json::from_str(
            r#"{
                "package_name": "foo",
                "version": "2",
                "origin": "test",
                "anon_download_url": "http://store/dl",
                "icon_url": "http://store/icon"
            }"#,
        )
        .unwrap();

        assert_eq!(entry.name, "foo");
        assert_eq!(entry.identity(), PackageIdentity::new("foo", "test"));
        assert_eq!(entry.icon_url.as_deref(), Some("http://store/icon"));
        assert_eq!(entry.download_sha512, None);
    }

    #[test]
    fn test_entry_without_icon() {
        let entry: CatalogEntry = serde_json::from_str(
            r#"{"origin": "potato", "package_name": "hello-app", "version": "2", "anon_download_url": "blah"}"#,
        )
        .unwrap();

        assert_eq!(entry.icon_url, None);
        assert_eq!(entry.anon_download_url, "blah");
    }
}
