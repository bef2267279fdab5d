//! Top-level error type.
//!
//! Every failure before the remote exit code is recovered aborts the
//! invocation, so the component errors are folded into one enum and surfaced
//! to `main` unchanged.

use crate::config::EnvError;
use crate::exec::ProtocolError;
use crate::lock::LockError;
use crate::provision::ProvisionError;
use crate::relay::RelayError;
use crate::resolve::ResolveError;
use crate::sync::SyncError;
use crate::toolchain::ToolchainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("staging package: {0}")]
    Provision(#[from] ProvisionError),

    #[error("syncing GOROOT to the device: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] EnvError),

    #[error("invalid binary path {path}: {reason}")]
    Binary { path: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, ExecError>;
