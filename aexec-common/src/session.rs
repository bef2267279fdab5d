//! One invocation, end to end.
//!
//! Wait for the device, make sure its GOROOT mirror is current, stage the
//! package and binary in a fresh workspace, run, and remove the workspace
//! again whatever the outcome.

use crate::config::ExecConfig;
use crate::errors::{ExecError, Result};
use crate::exec::{build_remote_command, run_remote};
use crate::layout::{RemoteLayout, RemoteWorkspace};
use crate::lock::{HostLock, acquire_async};
use crate::provision::Provisioner;
use crate::relay::Relay;
use crate::resolve::resolve;
use crate::sync::{Synchronizer, VersionStamp};
use crate::toolchain::Toolchain;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A binary to run and the arguments and directory it was invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Local directory of the package under test.
    pub workdir: PathBuf,
}

impl Job {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args,
            workdir: workdir.into(),
        }
    }

    /// Base name of the binary, used on the device for both the file and
    /// the workspace directory.
    pub fn binary_name(&self) -> Result<&str> {
        let invalid = |reason| ExecError::Binary {
            path: self.binary.display().to_string(),
            reason,
        };
        let name = self
            .binary
            .file_name()
            .ok_or_else(|| invalid("no file name"))?;
        name.to_str().ok_or_else(|| invalid("file name is not UTF-8"))
    }
}

pub struct Session<R, T> {
    relay: Arc<R>,
    toolchain: T,
    layout: RemoteLayout,
    state_dir: PathBuf,
    proxy: String,
    pid: u32,
}

impl<R: Relay + 'static, T: Toolchain> Session<R, T> {
    pub fn new(relay: Arc<R>, toolchain: T, config: &ExecConfig) -> Self {
        Self {
            relay,
            toolchain,
            layout: RemoteLayout::new(config.device_root.clone()),
            state_dir: config.state_dir.clone(),
            proxy: config.proxy.clone(),
            pid: std::process::id(),
        }
    }

    /// Override the id that keeps concurrent workspaces apart.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Run `job` on the device and return its exit code.
    ///
    /// The caller must hold the host relay lock; see [`Session::run_exclusive`].
    pub async fn run(&self, job: &Job) -> Result<i32> {
        let binary_name = job.binary_name()?;

        info!("waiting for device");
        self.relay.wait_for_device().await?;

        let stamp = VersionStamp::new(self.toolchain.version().await?);
        let ticket = Synchronizer::new(&*self.relay, &self.toolchain, &self.layout, &self.state_dir)
            .ensure_synced(&stamp)
            .await?;

        let workspace = self.layout.workspace(&ticket, binary_name, self.pid);
        debug!(
            "workspace {} (toolchain {})",
            workspace.dir(),
            workspace.stamp_tag()
        );

        let result = self.run_in(&workspace, job).await;

        if let Err(e) = self.relay.remove_all(workspace.dir()).await {
            warn!("failed to remove {}: {}", workspace.dir(), e);
        }
        result
    }

    /// [`Session::run`] under `lock`, held until the run is over.
    pub async fn run_exclusive<L>(&self, lock: L, job: &Job) -> Result<i32>
    where
        L: HostLock + 'static,
        L::Guard: 'static,
    {
        let _guard = acquire_async(lock).await?;
        self.run(job).await
    }

    async fn run_in(&self, workspace: &RemoteWorkspace, job: &Job) -> Result<i32> {
        let package = resolve(&self.toolchain, &job.workdir).await?;
        let cwd = self.layout.package_dir(workspace, &package);

        let provisioner = Provisioner::new(&*self.relay);
        provisioner
            .stage_package(&package, &job.workdir, &cwd)
            .await?;
        provisioner.push_binary(&job.binary, workspace).await?;

        let command = build_remote_command(&self.layout, workspace, &cwd, &self.proxy, &job.args);
        run_remote(&self.relay, command, workspace.binary_name()).await
    }
}
