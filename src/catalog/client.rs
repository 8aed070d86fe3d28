use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::Serialize;

use super::{Catalog, CatalogEntry};
use crate::error::SnapError;
use crate::http::{HttpClient, NonRetryableError};
use crate::package::validate_origin;
use crate::store::InstalledPackage;

/// HTTP catalog. Endpoints are injected so tests can point it at a local
/// server.
pub struct CatalogClient {
    http: HttpClient,
    details_url: String,
    bulk_url: String,
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    name: Vec<&'a str>,
}

impl CatalogClient {
    pub fn new(http: HttpClient, details_url: impl Into<String>, bulk_url: impl Into<String>) -> Self {
        Self {
            http,
            details_url: details_url.into(),
            bulk_url: bulk_url.into(),
        }
    }

    fn details_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.details_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    #[tracing::instrument(skip(self))]
    async fn details(&self, name: &str, origin: Option<String>) -> Result<CatalogEntry> {
        let key = match &origin {
            Some(origin) => format!("{}.{}", name, origin),
            None => name.to_string(),
        };
        let url = self.details_url_for(&key);

        let body = match self.http.get_text(&url).await {
            Ok(body) => body,
            Err(e) => {
                if let Some(status) = e.downcast_ref::<NonRetryableError>() {
                    debug!("Details lookup for {} failed: {}", key, status);
                    return Err(SnapError::NotFound(key).into());
                }
                return Err(SnapError::CatalogError(format!("{}: {:#}", url, e)).into());
            }
        };

        if body.trim().is_empty() {
            return Err(SnapError::NotFound(key).into());
        }

        let mut entry: CatalogEntry = serde_json::from_str(&body)
            .map_err(|e| SnapError::CatalogError(format!("invalid details for {}: {}", key, e)))?;
        if entry.name.is_empty() {
            return Err(SnapError::NotFound(key).into());
        }
        if entry.origin.is_empty() {
            match origin {
                Some(origin) => entry.origin = origin,
                None => {
                    return Err(
                        SnapError::CatalogError(format!("details for {} carry no origin", key))
                            .into(),
                    );
                }
            }
        }
        validate_origin(&entry.origin)
            .map_err(|e| SnapError::CatalogError(format!("details for {}: {}", key, e)))?;

        debug!("Catalog has {} {}", entry.identity(), entry.version);
        Ok(entry)
    }

    #[tracing::instrument(skip(self, installed))]
    async fn bulk_status(&self, installed: &[InstalledPackage]) -> Result<Vec<CatalogEntry>> {
        if installed.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<String> = installed.iter().map(|p| p.id.dir_name()).collect();
        let request = BulkRequest {
            name: keys.iter().map(String::as_str).collect(),
        };

        let body = self
            .http
            .post_json(&self.bulk_url, &request)
            .await
            .map_err(|e| SnapError::CatalogError(format!("{}: {:#}", self.bulk_url, e)))?;

        let entries: Vec<CatalogEntry> = serde_json::from_str(&body)
            .map_err(|e| SnapError::CatalogError(format!("invalid bulk response: {}", e)))?;

        let entries: Vec<CatalogEntry> = entries
            .into_iter()
            .filter(|entry| {
                let usable = !entry.name.is_empty() && !entry.origin.is_empty();
                if !usable {
                    debug!("Skipping incomplete bulk entry {:?}", entry);
                }
                usable
            })
            .collect();
        for entry in &entries {
            validate_origin(&entry.origin)
                .map_err(|e| SnapError::CatalogError(format!("bulk entry {}: {}", entry.name, e)))?;
        }

        debug!(
            "Catalog returned {} of {} packages",
            entries.len(),
            installed.len()
        );
        Ok(entries)
    }
}
