//! Host user enumeration for per-user package data.

use anyhow::Result;
use std::path::PathBuf;

use crate::runtime::Runtime;

/// One host user that may hold package data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHandle {
    pub name: String,
    pub home: PathBuf,
}

impl UserHandle {
    /// `<home>/apps`
    pub fn apps_dir(&self) -> PathBuf {
        self.home.join("apps")
    }
}

/// Enumerates the users whose data directories mirror installed versions.
pub trait UserDirectory: Send + Sync {
    fn list_users(&self) -> Result<Vec<UserHandle>>;
}

/// Treats every directory directly under a home root as a user. Evaluated on
/// every call so it reflects the live user set.
pub struct HomeRootUsers<'a, R: Runtime> {
    runtime: &'a R,
    home_root: PathBuf,
}

impl<'a, R: Runtime> HomeRootUsers<'a, R> {
    pub fn new(runtime: &'a R, home_root: PathBuf) -> Self {
        Self { runtime, home_root }
    }
}

impl<R: Runtime> UserDirectory for HomeRootUsers<'_, R> {
    #[tracing::instrument(skip(self))]
    fn list_users(&self) -> Result<Vec<UserHandle>> {
        if !self.runtime.is_dir(&self.home_root) {
            return Ok(vec![]);
        }

        let pattern = format!("{}/*", glob::Pattern::escape(&self.home_root.to_string_lossy()));
        let mut users = Vec::new();
        for home in self.runtime.glob(&pattern)? {
            if !self.runtime.is_dir(&home) {
                continue;
            }
            if let Some(name) = home.file_name().and_then(|n| n.to_str()) {
                users.push(UserHandle {
                    name: name.to_string(),
                    home: home.clone(),
                });
            }
        }
        Ok(users)
    }
}
