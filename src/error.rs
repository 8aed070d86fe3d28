//! Domain errors raised by the store, installer, updater and partition controller.
//!
//! Errors travel inside `anyhow::Error`; callers that need to branch on the kind
//! use `err.downcast_ref::<SnapError>()`.

use crate::updater::UpdateReport;

/// A single package that could not be updated.
#[derive(Debug)]
pub struct PackageFailure {
    pub package: String,
    pub message: String,
}

#[derive(Debug)]
pub enum SnapError {
    /// The catalog (or the local store) has no such package
    NotFound(String),
    /// The identical package is already installed and active at this version
    AlreadyInstalled { name: String, version: String },
    /// A package with this name is installed from a different origin
    PackageNameAlreadyInstalled {
        name: String,
        installed_origin: String,
    },
    /// The version directory already exists with content
    AlreadyPlaced { name: String, version: String },
    /// Content did not pass the authenticity check
    VerificationFailed(String),
    /// The activation hook failed; the install was rolled back
    ActivationFailed {
        name: String,
        version: String,
        reason: String,
    },
    /// Attempt to remove the version the current marker points at
    CannotRemoveCurrent { name: String, version: String },
    /// Attempt to stage an image into the active slot
    InvalidTarget(String),
    /// The catalog returned something unusable
    CatalogError(String),
    /// The package has no current version
    NotInstalled(String),
    /// Some packages were updated, some failed
    PartialUpdateFailure {
        report: UpdateReport,
        failures: Vec<PackageFailure>,
    },
}

impl std::fmt::Display for SnapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapError::NotFound(what) => write!(f, "package not found: {}", what),
            SnapError::AlreadyInstalled { name, version } => {
                write!(f, "package {} {} is already installed", name, version)
            }
            SnapError::PackageNameAlreadyInstalled {
                name,
                installed_origin,
            } => write!(
                f,
                "package name {} is already installed from origin {}",
                name, installed_origin
            ),
            SnapError::AlreadyPlaced { name, version } => {
                write!(f, "version {} of {} is already placed", version, name)
            }
            SnapError::VerificationFailed(msg) => write!(f, "verification failed: {}", msg),
            SnapError::ActivationFailed {
                name,
                version,
                reason,
            } => write!(
                f,
                "activation of {} {} failed: {}",
                name, version, reason
            ),
            SnapError::CannotRemoveCurrent { name, version } => {
                write!(f, "cannot remove {} {}: it is the current version", name, version)
            }
            SnapError::InvalidTarget(msg) => write!(f, "invalid partition target: {}", msg),
            SnapError::CatalogError(msg) => write!(f, "catalog error: {}", msg),
            SnapError::NotInstalled(name) => write!(f, "package {} is not installed", name),
            SnapError::PartialUpdateFailure { report, failures } => {
                write!(
                    f,
                    "{} package(s) updated, {} failed: ",
                    report.packages.len(),
                    failures.len()
                )?;
                let details = failures
                    .iter()
                    .map(|fail| format!("{} ({})", fail.package, fail.message))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}", details)
            }
        }
    }
}

impl std::error::Error for SnapError {}

/// Returns the domain error carried by `err`, if any.
pub fn snap_error(err: &anyhow::Error) -> Option<&SnapError> {
    err.downcast_ref::<SnapError>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::{SystemImageStatus, UpdatedPackage};

    #[test]
    fn test_display_messages() {
        let err = SnapError::PackageNameAlreadyInstalled {
            name: "hello-app".into(),
            installed_origin: "potato".into(),
        };
        assert!(err.to_string().contains("already installed from origin potato"));

        let err = SnapError::CannotRemoveCurrent {
            name: "foo".into(),
            version: "1.0".into(),
        };
        assert!(err.to_string().contains("current version"));

        let err = SnapError::InvalidTarget("slot a is active".into());
        assert!(err.to_string().contains("slot a is active"));
    }

    #[test]
    fn test_partial_update_failure_lists_every_failure() {
        let err = SnapError::PartialUpdateFailure {
            report: UpdateReport {
                packages: vec![UpdatedPackage {
                    name: "foo".into(),
                    origin: "sideload".into(),
                    version: "2".into(),
                }],
                system_image: SystemImageStatus::NotConfigured,
            },
            failures: vec![
                PackageFailure {
                    package: "bar.acme".into(),
                    message: "boom".into(),
                },
                PackageFailure {
                    package: "baz.acme".into(),
                    message: "bang".into(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("1 package(s) updated, 2 failed"));
        assert!(msg.contains("bar.acme (boom)"));
        assert!(msg.contains("baz.acme (bang)"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err = anyhow::Error::from(SnapError::NotFound("foo".into()))
            .context("while resolving foo");
        assert!(matches!(snap_error(&err), Some(SnapError::NotFound(_))));
    }
}
