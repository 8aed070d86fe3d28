//! Remote system-image index: which full image build is newest on a channel,
//! and where its payload lives.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::Deserialize;
use sha2::Sha256;
use std::path::Path;

use crate::download::download_file;
use crate::http::HttpClient;
use crate::progress::ProgressSink;
use crate::runtime::Runtime;
use crate::verify::file_digest;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageIndex {
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Image {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<ImageFile>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageFile {
    pub path: String,
    /// Hex SHA-256 of the file
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub order: u32,
}

impl ImageIndex {
    /// The full image with the highest build number.
    pub fn latest_full(&self) -> Option<&Image> {
        self.images
            .iter()
            .filter(|image| image.kind == "full")
            .max_by_key(|image| image.version)
    }
}

impl Image {
    /// The file that carries the image content: the first one by `order`.
    pub fn payload(&self) -> Option<&ImageFile> {
        self.files.iter().min_by_key(|file| file.order)
    }
}

pub struct SystemImageIndex {
    http: HttpClient,
    server: String,
}

impl SystemImageIndex {
    pub fn new(http: HttpClient, server: impl Into<String>) -> Self {
        Self {
            http,
            server: server.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// `GET <server>/<channel>/index.json`
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, channel: &str) -> Result<ImageIndex> {
        let url = self.url(&format!("{}/index.json", channel.trim_matches('/')));
        self.http
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch system image index for {}", channel))
    }

    /// Latest full build on `channel`, if the channel has any.
    pub async fn latest(&self, channel: &str) -> Result<Option<Image>> {
        let index = self.fetch(channel).await?;
        let latest = index.latest_full().cloned();
        debug!(
            "Latest build on {}: {:?}",
            channel,
            latest.as_ref().map(|image| image.version)
        );
        Ok(latest)
    }

    /// Downloads the image payload to `dest` and checks its SHA-256 when the
    /// index publishes one.
    #[tracing::instrument(skip(self, runtime, image, progress))]
    pub async fn download<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        image: &Image,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let Some(file) = image.payload() else {
            bail!("System image {} lists no files", image.version);
        };
        if image.files.len() > 1 {
            warn!(
                "System image {} lists {} files; staging only {}",
                image.version,
                image.files.len(),
                file.path
            );
        }

        download_file(runtime, &self.http, &self.url(&file.path), dest, progress).await?;

        if let Some(expected) = &file.checksum {
            let actual = file_digest::<Sha256, _>(runtime, dest)?;
            if !actual.eq_ignore_ascii_case(expected) {
                bail!(
                    "Checksum mismatch for system image {}: expected {}, got {}",
                    image.version,
                    expected,
                    actual
                );
            }
        }
        Ok(())
    }
}
