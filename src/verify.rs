//! Authenticity checks run on staged content before it is placed.

use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha512};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::SnapError;
use crate::runtime::Runtime;

/// A downloaded or sideloaded package waiting in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedContent {
    pub path: PathBuf,
    /// Hex SHA-512 published by the catalog; `None` for local files
    pub expected_sha512: Option<String>,
}

pub trait AuthenticityChecker: Send + Sync {
    /// Fails with `VerificationFailed` when the content cannot be trusted.
    fn verify(&self, content: &StagedContent) -> Result<()>;
}

/// Hex digest of a file, streamed through the runtime.
pub fn file_digest<D: Digest, R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<String> {
    let mut reader = runtime.open(path)?;
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Accepts content whose SHA-512 matches the digest published alongside it.
/// Content without a published digest is rejected.
pub struct DigestChecker<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> DigestChecker<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }
}

impl<R: Runtime> AuthenticityChecker for DigestChecker<'_, R> {
    #[tracing::instrument(skip(self))]
    fn verify(&self, content: &StagedContent) -> Result<()> {
        let Some(expected) = &content.expected_sha512 else {
            return Err(SnapError::VerificationFailed(format!(
                "{:?} carries no signature or digest",
                content.path
            ))
            .into());
        };

        let actual = file_digest::<Sha512, _>(self.runtime, &content.path)?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(SnapError::VerificationFailed(format!(
                "SHA-512 mismatch for {:?}: expected {}, got {}",
                content.path, expected, actual
            ))
            .into());
        }

        debug!("Digest of {:?} verified", content.path);
        Ok(())
    }
}
