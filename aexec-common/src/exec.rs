//! Remote execution and exit-code recovery.
//!
//! `adb exec-out` does not reliably report the exit status of the remote
//! command, so the command echoes `exitcode=$?` after the binary exits and
//! the status is parsed back out of the relayed stdout.

use crate::errors::{ExecError, Result};
use crate::layout::{RemoteLayout, RemoteWorkspace};
use crate::relay::{Relay, quote};
use crate::util::mask_url_credentials;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Marker echoed after the binary exits, followed by its status.
pub const EXIT_SENTINEL: &str = "exitcode=";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no exit code: {output:?}")]
    NoExitCode { output: String },

    #[error("bad exit code {tail:?} in output: {output:?}")]
    BadExitCode { tail: String, output: String },
}

/// Recover the remote exit code from the captured output.
///
/// The last sentinel wins, so a test that prints `exitcode=` itself cannot
/// spoof the result. Everything after it must be a decimal integer.
pub fn parse_exit_code(output: &str) -> std::result::Result<i32, ProtocolError> {
    let idx = output
        .rfind(EXIT_SENTINEL)
        .ok_or_else(|| ProtocolError::NoExitCode {
            output: output.to_string(),
        })?;
    let tail = &output[idx + EXIT_SENTINEL.len()..];
    tail.parse::<i32>().map_err(|_| ProtocolError::BadExitCode {
        tail: tail.to_string(),
        output: output.to_string(),
    })
}

/// Build the single shell command run on the device.
pub fn build_remote_command(
    layout: &RemoteLayout,
    workspace: &RemoteWorkspace,
    cwd: &str,
    proxy: &str,
    args: &[String],
) -> String {
    let goroot = layout.goroot();
    let args = args
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "export TMPDIR=\"{ws}\"\
         ; export GOROOT=\"{goroot}\"\
         ; export GOPATH=\"{gopath}\"\
         ; export CGO_ENABLED=0\
         ; export GOPROXY={proxy}\
         ; export GOCACHE=\"{gocache}\"\
         ; export PATH=\"{goroot}/bin\":$PATH\
         ; cd \"{cwd}\"\
         ; '{bin}' {args}\
         ; echo -n {EXIT_SENTINEL}$?",
        ws = workspace.dir(),
        gopath = workspace.gopath(),
        gocache = layout.gocache(),
        bin = workspace.binary(),
    )
}

/// Forwards `SIGQUIT` to the remote binary while it runs, so a hung test
/// dumps its goroutines on the device instead of killing the wrapper.
///
/// The process id on the device is unknown; the signal goes to every process
/// with the binary's name. The listener stops when this value is dropped, and
/// once no forwarder is left `SIGQUIT` takes its default action again.
pub struct QuitForwarder {
    task: Option<JoinHandle<()>>,
}

impl QuitForwarder {
    #[cfg(unix)]
    pub fn spawn<R: Relay + 'static>(relay: Arc<R>, binary_name: String) -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        quit_disposition::enter();
        let mut quit = match signal(SignalKind::quit()) {
            Ok(quit) => quit,
            Err(e) => {
                warn!("cannot listen for SIGQUIT: {}", e);
                quit_disposition::leave();
                return Self { task: None };
            }
        };
        let task = tokio::spawn(async move {
            while quit.recv().await.is_some() {
                debug!("forwarding SIGQUIT to {}", binary_name);
                let command = format!("killall -QUIT {}", quote(&binary_name));
                if let Err(e) = relay.shell(command).await {
                    warn!("forwarding SIGQUIT failed: {}", e);
                }
            }
        });
        Self { task: Some(task) }
    }

    #[cfg(not(unix))]
    pub fn spawn<R: Relay + 'static>(relay: Arc<R>, binary_name: String) -> Self {
        let _ = (relay, binary_name);
        Self { task: None }
    }
}

impl Drop for QuitForwarder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            #[cfg(unix)]
            quit_disposition::leave();
        }
    }
}

/// Process-wide count of live forwarders.
///
/// Tokio keeps its `SIGQUIT` handler installed after the last listener goes
/// away, which would leave the signal ignored. A conditional default action
/// registered next to it is armed whenever the count drops to zero.
#[cfg(unix)]
mod quit_disposition {
    use signal_hook::consts::SIGQUIT;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, OnceLock, PoisonError};
    use tracing::warn;

    static ACTIVE: Mutex<usize> = Mutex::new(0);
    static RESTORE_DEFAULT: OnceLock<Option<Arc<AtomicBool>>> = OnceLock::new();

    fn restore_default() -> Option<&'static AtomicBool> {
        RESTORE_DEFAULT
            .get_or_init(|| {
                let flag = Arc::new(AtomicBool::new(false));
                match signal_hook::flag::register_conditional_default(SIGQUIT, Arc::clone(&flag)) {
                    Ok(_) => Some(flag),
                    Err(e) => {
                        warn!("cannot restore default SIGQUIT action: {}", e);
                        None
                    }
                }
            })
            .as_deref()
    }

    pub(super) fn enter() {
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        if let Some(flag) = restore_default() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub(super) fn leave() {
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            if let Some(flag) = restore_default() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[cfg(test)]
    pub(super) fn default_restored() -> bool {
        restore_default().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Run `command` on the device, streaming its output, and return the
/// remote binary's exit code.
pub async fn run_remote<R: Relay + 'static>(
    relay: &Arc<R>,
    command: String,
    binary_name: &str,
) -> Result<i32> {
    debug!("remote command: {}", mask_url_credentials(&command));

    let forwarder = QuitForwarder::spawn(Arc::clone(relay), binary_name.to_string());
    let streamed = relay.stream(vec!["exec-out".to_string(), command]).await;
    drop(forwarder);
    let streamed = streamed?;

    match (parse_exit_code(&streamed.stdout), streamed.failure) {
        (Ok(code), Some(failure)) => {
            debug!("relay reported {} after the remote command finished", failure);
            Ok(code)
        }
        (Ok(code), None) => Ok(code),
        (Err(ProtocolError::NoExitCode { .. }), Some(failure)) => Err(failure.into()),
        (Err(e), _) => Err(ExecError::from(e)),
    }
}
