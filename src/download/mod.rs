use crate::http::HttpClient;
use crate::progress::ProgressSink;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Downloads `url` into `dest` through the runtime, with retry support.
/// Returns the number of bytes written. A partially written `dest` is
/// removed when the download fails.
#[tracing::instrument(skip(runtime, http_client, progress))]
pub async fn download_file<R: Runtime + ?Sized>(
    runtime: &R,
    http_client: &HttpClient,
    url: &str,
    dest: &Path,
    progress: &dyn ProgressSink,
) -> Result<u64> {
    info!("Downloading {}...", url);

    let created = AtomicBool::new(false);
    let result = http_client
        .download_file(
            url,
            || {
                created.store(true, Ordering::SeqCst);
                runtime
                    .create_file(dest)
                    .with_context(|| format!("Failed to create {:?}", dest))
            },
            progress,
        )
        .await;

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            if created.load(Ordering::SeqCst)
                && runtime.exists(dest)
                && let Err(remove) = runtime.remove_file(dest)
            {
                warn!("Failed to remove partial download {:?}: {:#}", dest, remove);
            }
            return Err(e);
        }
    };

    info!("Download complete ({} bytes).", bytes);
    Ok(bytes)
}
