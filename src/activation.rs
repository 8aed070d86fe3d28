//! Desktop and service wiring run after a version becomes current.

use anyhow::Result;
use std::path::Path;

use crate::package::PackageIdentity;
use crate::progress::ProgressSink;

pub trait ActivationHook: Send + Sync {
    /// Wires up the version placed at `path`. An error makes the installer
    /// restore the previous version.
    fn activate(
        &self,
        id: &PackageIdentity,
        version: &str,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()>;
}

/// Hook that does nothing; packages need no wiring on this host.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ActivationHook for NoHooks {
    fn activate(
        &self,
        id: &PackageIdentity,
        version: &str,
        _path: &Path,
        _progress: &dyn ProgressSink,
    ) -> Result<()> {
        log::debug!("No activation hooks for {} {}", id, version);
        Ok(())
    }
}
