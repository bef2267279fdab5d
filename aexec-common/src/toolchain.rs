//! Local Go toolchain queries.
//!
//! The toolchain is only a data source: its version banner stamps the device
//! mirror, `go list` resolves packages and install targets, and `go install
//! cmd` builds the tools that get pushed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors that can occur during toolchain queries.
///
/// `Clone` so a memoized GOROOT failure can be handed out repeatedly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("GOROOT not found")]
    GorootNotFound,

    #[error("{command}: {detail}")]
    Command { command: String, detail: String },
}

/// Result type for toolchain operations.
pub type Result<T> = std::result::Result<T, ToolchainError>;

/// The local build-info collaborator.
pub trait Toolchain: Send + Sync {
    /// Local toolchain root.
    fn root(&self) -> Result<PathBuf>;

    /// Version banner, used verbatim as the sync stamp.
    fn version(&self) -> impl Future<Output = Result<String>> + Send;

    /// Raw `<import path>:<standard>` line for the package in `dir`.
    fn list_package(&self, dir: &Path) -> impl Future<Output = Result<String>> + Send;

    /// Build the target platform's commands (`go install cmd`).
    fn install_tools(&self) -> impl Future<Output = Result<()>> + Send;

    /// Install target of `package` for the target platform.
    fn target(&self, package: &str) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Process-wide, compute-once GOROOT.
///
/// The first lookup's outcome, success or failure, is kept for the life of
/// the process; later callers never re-run the lookup.
#[derive(Debug)]
pub struct GorootCell {
    cell: OnceLock<Result<PathBuf>>,
}

impl GorootCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_resolve(&self, resolve: impl FnOnce() -> Result<PathBuf>) -> Result<PathBuf> {
        self.cell.get_or_init(resolve).clone()
    }
}

impl Default for GorootCell {
    fn default() -> Self {
        Self::new()
    }
}

static GOROOT: GorootCell = GorootCell::new();

/// Locate GOROOT once per process.
pub fn find_goroot() -> Result<PathBuf> {
    GOROOT.get_or_resolve(|| resolve_goroot(|key| std::env::var(key).ok(), go_env_goroot))
}

/// `GOROOT` from the environment when non-empty, otherwise `fallback`
/// (normally `go env GOROOT` with whatever `go` is on PATH).
pub fn resolve_goroot<L, F>(lookup: L, fallback: F) -> Result<PathBuf>
where
    L: Fn(&str) -> Option<String>,
    F: FnOnce() -> Result<String>,
{
    if let Some(root) = lookup("GOROOT").filter(|r| !r.trim().is_empty()) {
        return Ok(PathBuf::from(root));
    }
    debug!("GOROOT unset, asking go env");
    let root = fallback()?;
    let root = root.trim();
    if root.is_empty() {
        return Err(ToolchainError::GorootNotFound);
    }
    Ok(PathBuf::from(root))
}

fn go_env_goroot() -> Result<String> {
    let output = std::process::Command::new("go")
        .args(["env", "GOROOT"])
        .stderr(std::process::Stdio::inherit())
        .output()
        .map_err(|e| ToolchainError::Command {
            command: "go env GOROOT".to_string(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(ToolchainError::Command {
            command: "go env GOROOT".to_string(),
            detail: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The `go` command under GOROOT.
#[derive(Debug, Clone, Default)]
pub struct GoToolchain {
    root: Option<PathBuf>,
}

impl GoToolchain {
    /// Use the process-wide GOROOT.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the toolchain to `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn go_tool(&self) -> Result<PathBuf> {
        Ok(self.root()?.join("bin").join("go"))
    }

    /// Run `go <args>` and return stdout; failures carry stderr.
    async fn go(&self, args: &[&str], dir: Option<&Path>) -> Result<String> {
        let go = self.go_tool()?;
        let described = format!("{} {}", go.display(), args.join(" "));
        let mut cmd = Command::new(&go);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await.map_err(|e| ToolchainError::Command {
            command: described.clone(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ToolchainError::Command {
                command: described,
                detail: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Toolchain for GoToolchain {
    fn root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => find_goroot(),
        }
    }

    async fn version(&self) -> Result<String> {
        self.go(&["version"], None).await
    }

    async fn list_package(&self, dir: &Path) -> Result<String> {
        self.go(
            &["list", "-e", "-f", "{{.ImportPath}}:{{.Standard}}", "."],
            Some(dir),
        )
        .await
    }

    async fn install_tools(&self) -> Result<()> {
        info!("building Go commands for the target platform");
        self.go(&["install", "cmd"], None).await.map(|_| ()).inspect_err(|e| {
            warn!("go install cmd failed: {}", e);
        })
    }

    async fn target(&self, package: &str) -> Result<PathBuf> {
        let out = self.go(&["list", "-f", "{{.Target}}", package], None).await?;
        Ok(PathBuf::from(out.trim()))
    }
}
