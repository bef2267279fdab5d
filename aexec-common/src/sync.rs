//! Version-stamped GOROOT mirror on the device.
//!
//! The host keeps the stamp of the last completed sync in a status file.
//! A run whose local toolchain version matches the stamp skips the sync; any
//! mismatch wipes the device root and pushes a fresh copy. The status file is
//! held under an exclusive lock for the whole check-and-copy, and the stamp
//! is only written after every push succeeded, so a failed sync is retried
//! by the next invocation.

use crate::layout::RemoteLayout;
use crate::lock::{FileLock, LockError, acquire_async};
use crate::relay::{Relay, RelayError};
use crate::toolchain::{Toolchain, ToolchainError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Status file name. `cmd/dist` deletes a file of this name on bootstrap to
/// force a resync, so it must not change.
pub const SYNC_STATUS_FILE: &str = "go_android_exec-adb-sync-status";

/// Top-level GOROOT entries that are not mirrored wholesale.
const SKIPPED_ROOT_ENTRIES: [&str; 2] = ["bin", "pkg"];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("sync status file {path}: {source}")]
    Status {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to locate {0} for target platform")]
    ToolDirNotFound(&'static str),

    #[error("reading {path}: {source}")]
    LocalRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is outside GOROOT {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Local toolchain version banner, compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStamp(String);

impl VersionStamp {
    pub fn new(banner: impl Into<String>) -> Self {
        Self(banner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short content hash for log lines.
    pub fn tag(&self) -> String {
        let hash = blake3::hash(self.0.as_bytes());
        hash.to_hex().as_str()[..12].to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stamp already matched; nothing was pushed.
    Fresh,
    /// The device root was wiped and the mirror pushed again.
    Resynced,
}

/// Proof that the device mirror matches the local toolchain.
///
/// Only [`Synchronizer::ensure_synced`] hands these out, and a
/// [`crate::layout::RemoteWorkspace`] cannot be created without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTicket {
    stamp_tag: String,
    outcome: SyncOutcome,
}

impl SyncTicket {
    pub(crate) fn new(stamp: &VersionStamp, outcome: SyncOutcome) -> Self {
        Self {
            stamp_tag: stamp.tag(),
            outcome,
        }
    }

    pub fn stamp_tag(&self) -> &str {
        &self.stamp_tag
    }

    pub fn outcome(&self) -> SyncOutcome {
        self.outcome
    }
}

/// Keeps the device GOROOT in step with the local toolchain.
pub struct Synchronizer<'a, R, T> {
    relay: &'a R,
    toolchain: &'a T,
    layout: &'a RemoteLayout,
    status_path: PathBuf,
}

impl<'a, R: Relay, T: Toolchain> Synchronizer<'a, R, T> {
    pub fn new(relay: &'a R, toolchain: &'a T, layout: &'a RemoteLayout, state_dir: &Path) -> Self {
        Self {
            relay,
            toolchain,
            layout,
            status_path: state_dir.join(SYNC_STATUS_FILE),
        }
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// Resync the device if its stamp differs from `stamp`.
    pub async fn ensure_synced(&self, stamp: &VersionStamp) -> Result<SyncTicket, SyncError> {
        let mut guard = acquire_async(FileLock::new(self.status_path.clone())).await?;

        let current = read_stamp(guard.file()).map_err(|source| self.status_err(source))?;
        if current == stamp.as_str().as_bytes() {
            debug!("device GOROOT is current ({})", stamp.tag());
            return Ok(SyncTicket::new(stamp, SyncOutcome::Fresh));
        }

        info!("syncing GOROOT to the device ({})", stamp.tag());
        self.push_goroot().await?;

        write_stamp(guard.file(), stamp).map_err(|source| self.status_err(source))?;
        debug!("recorded sync stamp in {}", self.status_path.display());
        Ok(SyncTicket::new(stamp, SyncOutcome::Resynced))
    }

    async fn push_goroot(&self) -> Result<(), SyncError> {
        let layout = self.layout;
        let goroot = self.toolchain.root()?;
        self.relay.remove_all(layout.root()).await?;

        self.toolchain.install_tools().await?;

        self.relay.mkdir(&layout.goroot()).await?;

        let go_dir = self.tool_dir("cmd/go").await?;
        self.relay
            .push(&[go_dir.as_path()], &layout.goroot_path("bin"))
            .await?;

        self.relay.mkdir(&layout.goroot_path("pkg/tool")).await?;
        let include = goroot.join("pkg").join("include");
        self.relay
            .push(&[include.as_path()], &layout.goroot_path("pkg/include"))
            .await?;

        let tools = self.tool_dir("cmd/compile").await?;
        let rel = slash_relative(&tools, &goroot)?;
        self.relay
            .push(&[tools.as_path()], &layout.goroot_path(&rel))
            .await?;

        for (name, path) in mirrored_entries(&goroot)? {
            self.relay
                .push(&[path.as_path()], &layout.goroot_path(&name))
                .await?;
        }
        Ok(())
    }

    /// Directory holding the target-platform install of `package`.
    async fn tool_dir(&self, package: &'static str) -> Result<PathBuf, SyncError> {
        let target = self.toolchain.target(package).await?;
        match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
            _ => Err(SyncError::ToolDirNotFound(package)),
        }
    }

    fn status_err(&self, source: std::io::Error) -> SyncError {
        SyncError::Status {
            path: self.status_path.clone(),
            source,
        }
    }
}

/// Raw status file contents; anything that is not the current stamp,
/// including bytes that are not UTF-8, just means "out of date".
fn read_stamp(file: &mut File) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn write_stamp(file: &mut File, stamp: &VersionStamp) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(stamp.as_str().as_bytes())?;
    file.sync_all()
}

/// `path` relative to `root`, with `/` separators.
fn slash_relative(path: &Path, root: &Path) -> Result<String, SyncError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| SyncError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Top-level entries of the local GOROOT other than `bin` and `pkg`, by name.
fn mirrored_entries(goroot: &Path) -> Result<Vec<(String, PathBuf)>, SyncError> {
    let read_err = |source| SyncError::LocalRoot {
        path: goroot.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(goroot).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIPPED_ROOT_ENTRIES.contains(&name.as_str()) {
            continue;
        }
        entries.push((name, entry.path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
