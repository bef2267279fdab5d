//! Workspace provisioning.
//!
//! Stages what a test binary needs in its device workspace: the binary
//! itself, and for packages outside the standard library the package's Go
//! sources plus `testdata`, `go.mod` and `go.sum` from the package directory
//! and each of its ancestors up to the import-path root.

use crate::layout::{self, RemoteWorkspace};
use crate::relay::{Relay, RelayError};
use crate::resolve::Package;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Files copied from the package directory and each ancestor.
pub const ANCESTOR_FILES: [&str; 3] = ["testdata", "go.mod", "go.sum"];

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("invalid source pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("listing Go sources: {0}")]
    Walk(#[from] glob::GlobError),
}

/// Relative ancestor prefixes for an import path: `""`, `".."`, `"../.."`,
/// one per path component plus the package directory itself.
pub fn ancestor_levels(import_path: &str) -> Vec<String> {
    let depth = import_path.split('/').filter(|c| !c.is_empty()).count();
    let mut levels = Vec::with_capacity(depth + 1);
    let mut dir = String::new();
    levels.push(dir.clone());
    for _ in 0..depth {
        dir = layout::join(&[&dir, ".."]);
        levels.push(dir.clone());
    }
    levels
}

/// Stages packages and binaries through a relay.
pub struct Provisioner<'a, R> {
    relay: &'a R,
}

impl<'a, R: Relay> Provisioner<'a, R> {
    pub fn new(relay: &'a R) -> Self {
        Self { relay }
    }

    /// Stage the package sources. Standard-library packages are already
    /// present in the mirrored GOROOT.
    pub async fn stage_package(
        &self,
        package: &Package,
        local_cwd: &Path,
        remote_cwd: &str,
    ) -> Result<(), ProvisionError> {
        if package.standard {
            return Ok(());
        }
        self.relay.mkdir(remote_cwd).await?;
        self.copy_ancestor_files(&package.import_path, local_cwd, remote_cwd)
            .await?;
        self.copy_go_files(local_cwd, remote_cwd).await
    }

    /// Push the binary to its workspace location.
    pub async fn push_binary(
        &self,
        binary: &Path,
        workspace: &RemoteWorkspace,
    ) -> Result<(), ProvisionError> {
        self.relay.push(&[binary], &workspace.binary()).await?;
        Ok(())
    }

    async fn copy_ancestor_files(
        &self,
        import_path: &str,
        local_cwd: &Path,
        remote_cwd: &str,
    ) -> Result<(), ProvisionError> {
        for level in ancestor_levels(import_path) {
            let local_dir = local_dir_at(local_cwd, &level);
            for name in ANCESTOR_FILES {
                let local = local_dir.join(name);
                if !local.exists() {
                    continue;
                }
                let remote = layout::join(&[remote_cwd, &level]);
                debug!("staging {} -> {}", local.display(), remote);
                self.relay.mkdir(&remote).await?;
                self.relay.push(&[local.as_path()], &remote).await?;
            }
        }
        Ok(())
    }

    async fn copy_go_files(&self, local_cwd: &Path, remote_cwd: &str) -> Result<(), ProvisionError> {
        let files = go_files(local_cwd)?;
        if files.is_empty() {
            return Ok(());
        }
        let refs: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
        self.relay.push(&refs, remote_cwd).await?;
        Ok(())
    }
}

fn local_dir_at(local_cwd: &Path, level: &str) -> PathBuf {
    level
        .split('/')
        .filter(|c| !c.is_empty())
        .fold(local_cwd.to_path_buf(), |dir, c| dir.join(c))
}

/// `*.go` in `dir`, sorted.
pub fn go_files(dir: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    let pattern = format!(
        "{}/*.go",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        files.push(entry?);
    }
    files.sort();
    Ok(files)
}
