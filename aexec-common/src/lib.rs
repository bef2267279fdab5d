//! Shared core for aexec.
//!
//! Runs a locally built Go binary on a tethered Android device through `adb`:
//! keeps a version-stamped mirror of GOROOT on the device, stages the package
//! under test into a per-invocation workspace, runs the binary and recovers
//! its real exit code from the relayed output.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod exec;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod provision;
pub mod relay;
pub mod resolve;
pub mod session;
pub mod sync;
pub mod toolchain;
pub mod util;

pub use config::{EnvError, EnvParser, ExecConfig};
pub use errors::{ExecError, Result};
pub use exec::{EXIT_SENTINEL, parse_exit_code};
pub use layout::{RemoteLayout, RemoteWorkspace};
pub use lock::{FileLock, HostLock, MemoryLock};
pub use logging::{LogConfig, LoggingGuards, init_logging};
pub use relay::{AdbRelay, Relay, RelayError, StreamedOutput};
pub use resolve::{Package, ResolveError};
pub use session::{Job, Session};
pub use sync::{SyncError, SyncOutcome, SyncTicket, Synchronizer, VersionStamp};
pub use toolchain::{GoToolchain, Toolchain, ToolchainError};
