//! Device-side directory layout.
//!
//! Device paths are always slash-separated, whatever the host's separator,
//! so they are built as strings with [`join`] rather than with `PathBuf`.
//!
//! ```text
//! <root>/
//!   goroot/                  mirrored toolchain root
//!   gocache/                 shared build cache
//!   <binary>-<pid>/          per-invocation workspace
//!     <binary>
//!     gopath/src/<import>/   working directory for non-standard packages
//! ```

use crate::resolve::Package;
use crate::sync::SyncTicket;

pub const DEFAULT_DEVICE_ROOT: &str = "/data/local/tmp/go_android_exec";

/// Join slash-separated path elements and clean the result lexically,
/// resolving `.` and `..` the way `path.Join` does on the device.
pub fn join(elements: &[&str]) -> String {
    let joined = elements
        .iter()
        .filter(|e| !e.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    clean(&joined)
}

/// Lexically clean a slash-separated path.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

/// Fixed locations under the device root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    root: String,
}

impl RemoteLayout {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn goroot(&self) -> String {
        join(&[&self.root, "goroot"])
    }

    pub fn gocache(&self) -> String {
        join(&[&self.root, "gocache"])
    }

    /// A path inside the mirrored GOROOT, `rel` being slash-separated.
    pub fn goroot_path(&self, rel: &str) -> String {
        join(&[&self.goroot(), rel])
    }

    /// The workspace for one invocation.
    ///
    /// Requires a ticket from a completed sync: a resync wipes the whole
    /// device root, so a workspace created before the stamp was confirmed
    /// could be deleted underneath its run.
    pub fn workspace(&self, ticket: &SyncTicket, binary_name: &str, pid: u32) -> RemoteWorkspace {
        RemoteWorkspace {
            dir: join(&[&self.root, &workspace_name(binary_name, pid)]),
            binary_name: binary_name.to_string(),
            stamp_tag: ticket.stamp_tag().to_string(),
        }
    }

    /// Working directory for `package` on the device.
    pub fn package_dir(&self, workspace: &RemoteWorkspace, package: &Package) -> String {
        if package.standard {
            join(&[&self.goroot(), "src", &package.import_path])
        } else {
            join(&[&workspace.gopath(), "src", &package.import_path])
        }
    }
}

/// `<binary>-<pid>`: identically named test binaries (e.g. `template.test`
/// from both `html/template` and `text/template`) run concurrently.
pub fn workspace_name(binary_name: &str, pid: u32) -> String {
    format!("{binary_name}-{pid}")
}

/// Per-invocation scratch directory on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkspace {
    dir: String,
    binary_name: String,
    stamp_tag: String,
}

impl RemoteWorkspace {
    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Short tag of the toolchain stamp this workspace was created under.
    pub fn stamp_tag(&self) -> &str {
        &self.stamp_tag
    }

    pub fn gopath(&self) -> String {
        join(&[&self.dir, "gopath"])
    }

    pub fn binary(&self) -> String {
        join(&[&self.dir, &self.binary_name])
    }
}
