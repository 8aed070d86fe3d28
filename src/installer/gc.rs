use log::{debug, warn};

use crate::error::PackageFailure;
use crate::package::PackageIdentity;
use crate::runtime::Runtime;
use crate::store::VersionStore;

/// What a garbage collection pass removed, and what it could not.
#[derive(Debug, Default)]
pub struct GcReport {
    pub removed: Vec<String>,
    pub failures: Vec<PackageFailure>,
}

impl GcReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps the current version and the newest other version; removes the
/// rest. Never fails: problems with individual versions are collected.
#[tracing::instrument(skip(store))]
pub fn collect<R: Runtime>(store: &VersionStore<'_, R>, id: &PackageIdentity) -> GcReport {
    let mut report = GcReport::default();

    let versions = match store.versions(id) {
        Ok(versions) => versions,
        Err(e) => {
            warn!("Cannot list versions of {} for cleanup: {:#}", id, e);
            report.failures.push(PackageFailure {
                package: id.to_string(),
                message: format!("{:#}", e),
            });
            return report;
        }
    };

    // Install order; the last inactive one is the fallback
    let mut inactive: Vec<_> = versions.into_iter().filter(|v| !v.active).collect();
    if let Some(fallback) = inactive.pop() {
        debug!("Keeping {} {} as fallback", id, fallback.version);
    }

    for old in inactive {
        match store.remove(id, &old.version) {
            Ok(()) => {
                debug!("Removed {} {}", id, old.version);
                report.removed.push(old.version);
            }
            Err(e) => {
                warn!("Failed to remove {} {}: {:#}", id, old.version, e);
                report.failures.push(PackageFailure {
                    package: format!("{} {}", id, old.version),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    report
}
