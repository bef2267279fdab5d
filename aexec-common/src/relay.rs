//! Command relay client.
//!
//! A thin wrapper over `adb push` and `adb exec-out`. Callers hold the host
//! relay lock (see [`crate::lock`]) for the whole run, so the client itself
//! does no locking.

use crate::config::ExecConfig;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Shell loop that returns once the device has finished booting.
/// `adb wait-for-device` alone only waits for the transport.
pub const BOOT_WAIT_SCRIPT: &str =
    "while [[ -z $(getprop sys.boot_completed) ]]; do sleep 1; done;";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{command}: failed to start: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: {status}")]
    Failed { command: String, status: String },

    #[error("{command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Output of a streamed relay command.
#[derive(Debug)]
pub struct StreamedOutput {
    /// Everything the remote side wrote to stdout.
    pub stdout: String,
    /// Set when the relay reported failure. The remote command may still
    /// have completed; the caller decides from `stdout`.
    pub failure: Option<RelayError>,
}

/// Narrow interface to the relay tool.
pub trait Relay: Send + Sync {
    /// Run a relay command and collect its combined output.
    ///
    /// On failure the full command line and captured output are echoed to
    /// stderr before the error is returned.
    fn run(&self, args: Vec<String>) -> impl Future<Output = Result<String, RelayError>> + Send;

    /// Run a relay command with stdout copied live to our stdout and
    /// buffered, and stderr passed through.
    fn stream(
        &self,
        args: Vec<String>,
    ) -> impl Future<Output = Result<StreamedOutput, RelayError>> + Send;

    /// `exec-out <command>` on the device.
    fn shell(&self, command: String) -> impl Future<Output = Result<String, RelayError>> + Send {
        self.run(vec!["exec-out".to_string(), command])
    }

    /// `push <local...> <remote>`.
    fn push(
        &self,
        locals: &[&Path],
        remote: &str,
    ) -> impl Future<Output = Result<String, RelayError>> + Send {
        let mut args = Vec::with_capacity(locals.len() + 2);
        args.push("push".to_string());
        args.extend(locals.iter().map(|p| p.to_string_lossy().into_owned()));
        args.push(remote.to_string());
        self.run(args)
    }

    /// `mkdir -p` on the device.
    fn mkdir(&self, remote: &str) -> impl Future<Output = Result<String, RelayError>> + Send {
        self.shell(format!("mkdir -p {}", quote(remote)))
    }

    /// `rm -rf` on the device.
    fn remove_all(&self, remote: &str) -> impl Future<Output = Result<String, RelayError>> + Send {
        self.shell(format!("rm -rf {}", quote(remote)))
    }

    /// Wait for the device to report `sys.boot_completed`. No timeout; the
    /// driver's own timeout bounds this.
    fn wait_for_device(&self) -> impl Future<Output = Result<String, RelayError>> + Send {
        self.run(vec![
            "wait-for-device".to_string(),
            "exec-out".to_string(),
            BOOT_WAIT_SCRIPT.to_string(),
        ])
    }
}

/// Quote a word for the device shell.
pub fn quote(word: &str) -> String {
    shell_escape::unix::escape(word.into()).into_owned()
}

/// `adb`, with operator flags from `GOANDROID_ADB_FLAGS` in front of every
/// command.
#[derive(Debug, Clone)]
pub struct AdbRelay {
    program: String,
    flags: Vec<String>,
}

impl AdbRelay {
    pub fn new(program: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            flags,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.relay_program.clone(), config.relay_flags.clone())
    }

    fn argv<'a>(&'a self, args: &'a [String]) -> impl Iterator<Item = &'a String> {
        self.flags.iter().chain(args)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv(args)).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Command line as echoed in diagnostics.
    pub fn describe(&self, args: &[String]) -> String {
        std::iter::once(&self.program)
            .chain(self.argv(args))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Relay for AdbRelay {
    async fn run(&self, args: Vec<String>) -> Result<String, RelayError> {
        let described = self.describe(&args);
        debug!("relay: {}", described);

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|source| RelayError::Spawn {
                command: described.clone(),
                source,
            })?;

        // stdout followed by stderr; adb writes its own errors to stderr.
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let text = String::from_utf8_lossy(&combined).into_owned();

        if !output.status.success() {
            eprint!("{described}\n{text}");
            return Err(RelayError::Failed {
                command: described,
                status: output.status.to_string(),
            });
        }
        Ok(text)
    }

    async fn stream(&self, args: Vec<String>) -> Result<StreamedOutput, RelayError> {
        let described = self.describe(&args);
        debug!("relay (streamed): {}", described);

        // Both streams are piped rather than inherited: a hung adb must not
        // keep the driver's stdout/stderr open after we are killed.
        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RelayError::Spawn {
                command: described.clone(),
                source,
            })?;

        let io_err = |source| RelayError::Io {
            command: described.clone(),
            source,
        };

        let mut child_stderr = child.stderr.take();
        let stderr_pump = tokio::spawn(async move {
            if let Some(stderr) = child_stderr.as_mut() {
                let mut local = tokio::io::stderr();
                let _ = tokio::io::copy(stderr, &mut local).await;
                let _ = local.flush().await;
            }
        });

        let mut captured = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            let mut local = tokio::io::stdout();
            let mut buf = [0u8; 8192];
            loop {
                let n = stdout.read(&mut buf).await.map_err(io_err)?;
                if n == 0 {
                    break;
                }
                local.write_all(&buf[..n]).await.map_err(io_err)?;
                local.flush().await.map_err(io_err)?;
                captured.extend_from_slice(&buf[..n]);
            }
        }

        let status = child.wait().await.map_err(io_err)?;
        let _ = stderr_pump.await;

        let failure = (!status.success()).then(|| RelayError::Failed {
            command: described.clone(),
            status: status.to_string(),
        });
        Ok(StreamedOutput {
            stdout: String::from_utf8_lossy(&captured).into_owned(),
            failure,
        })
    }
}
