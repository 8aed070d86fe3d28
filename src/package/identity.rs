use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::runtime::Runtime;

/// Origin given to packages installed from a local file.
pub const SIDELOAD_ORIGIN: &str = "sideload";

/// A package as published by one origin. Version directories are keyed by
/// `(name, origin, version)`; the "already installed" namespace is `name` alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub origin: String,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
        }
    }

    /// Name of the namespace directory under the apps root: `<name>.<origin>`.
    pub fn dir_name(&self) -> String {
        format!("{}.{}", self.name, self.origin)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.origin)
    }
}

impl FromStr for PackageIdentity {
    type Err = anyhow::Error;

    /// Parses `<name>.<origin>`; the origin is everything after the last dot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((name, origin)) if !name.is_empty() && !origin.is_empty() => {
                Ok(PackageIdentity::new(name, origin))
            }
            _ => bail!("Invalid package identity {:?}. Expected 'name.origin'.", s),
        }
    }
}

/// What the caller asked to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRef {
    /// A package archive on the local filesystem
    Local(PathBuf),
    /// A catalog package, optionally pinned to an origin
    Remote { name: String, origin: Option<String> },
}

impl PackageRef {
    /// An existing local file wins over the `name[.origin]` interpretation.
    pub fn parse<R: Runtime + ?Sized>(runtime: &R, reference: &str) -> Result<Self> {
        let path = Path::new(reference);
        if runtime.exists(path) && !runtime.is_dir(path) {
            return Ok(PackageRef::Local(path.to_path_buf()));
        }

        if reference.is_empty() || reference.contains('/') {
            bail!(
                "Invalid package reference {:?}. Expected a file or 'name[.origin]'.",
                reference
            );
        }

        match reference.rsplit_once('.') {
            Some((name, origin)) => {
                if name.is_empty() || origin.is_empty() {
                    bail!(
                        "Invalid package reference {:?}. Expected 'name[.origin]'.",
                        reference
                    );
                }
                Ok(PackageRef::Remote {
                    name: name.to_string(),
                    origin: Some(origin.to_string()),
                })
            }
            None => Ok(PackageRef::Remote {
                name: reference.to_string(),
                origin: None,
            }),
        }
    }

    /// The catalog lookup key: `name` or `name.origin`.
    pub fn catalog_key(&self) -> Option<String> {
        match self {
            PackageRef::Local(_) => None,
            PackageRef::Remote { name, origin: None } => Some(name.clone()),
            PackageRef::Remote {
                name,
                origin: Some(origin),
            } => Some(format!("{}.{}", name, origin)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    fn runtime_without_files() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        runtime.expect_is_dir().returning(|_| false);
        runtime
    }

    #[test]
    fn test_identity_dir_name_and_parse() {
        let id = PackageIdentity::new("hello-app", "potato");
        assert_eq!(id.dir_name(), "hello-app.potato");
        assert_eq!("hello-app.potato".parse::<PackageIdentity>().unwrap(), id);
        assert!("hello-app".parse::<PackageIdentity>().is_err());
        assert!(".potato".parse::<PackageIdentity>().is_err());
    }

    #[test]
    fn test_parse_remote_with_origin() {
        let runtime = runtime_without_files();
        let parsed = PackageRef::parse(&runtime, "hello-app.potato").unwrap();
        assert_eq!(
            parsed,
            PackageRef::Remote {
                name: "hello-app".into(),
                origin: Some("potato".into())
            }
        );
        assert_eq!(parsed.catalog_key().as_deref(), Some("hello-app.potato"));
    }

    #[test]
    fn test_parse_remote_without_origin() {
        let runtime = runtime_without_files();
        let parsed = PackageRef::parse(&runtime, "foo").unwrap();
        assert_eq!(
            parsed,
            PackageRef::Remote {
                name: "foo".into(),
                origin: None
            }
        );
        assert_eq!(parsed.catalog_key().as_deref(), Some("foo"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let runtime = runtime_without_files();
        assert!(PackageRef::parse(&runtime, "").is_err());
        assert!(PackageRef::parse(&runtime, "foo.").is_err());
        assert!(PackageRef::parse(&runtime, ".foo").is_err());
        assert!(PackageRef::parse(&runtime, "no/such/file.snap").is_err());
    }

    #[test]
    fn test_parse_existing_file_is_local() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime.expect_is_dir().returning(|_| false);

        let parsed = PackageRef::parse(&runtime, "/tmp/foo_1.0_all.snap").unwrap();
        assert_eq!(
            parsed,
            PackageRef::Local(PathBuf::from("/tmp/foo_1.0_all.snap"))
        );
        assert_eq!(parsed.catalog_key(), None);
    }
}
