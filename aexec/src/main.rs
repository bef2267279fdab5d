//! aexec - run Go test binaries on an Android device
//!
//! Installed as `go_android_$GOARCH_exec`, the go command invokes it as
//! `aexec <binary> [args...]` from the package directory. The exit code is
//! the binary's exit code on the device, or 1 if the run itself failed.

#![forbid(unsafe_code)]

use aexec_common::{
    AdbRelay, ExecConfig, FileLock, GoToolchain, Job, LogConfig, Session, init_logging,
};
use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "aexec")]
#[command(
    author,
    about = "Run a Go binary on a tethered Android device",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Binary built for the device, then its arguments, passed through as-is
    #[arg(
        required = true,
        value_name = "BINARY",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl Cli {
    /// Split the binary off its arguments.
    fn into_parts(self) -> Result<(PathBuf, Vec<String>)> {
        let mut command = self.command.into_iter();
        let binary = command
            .next()
            .ok_or_else(|| anyhow!("missing binary argument"))?;
        Ok((PathBuf::from(binary), command.collect()))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env("warn");
    let guards = match init_logging(&log_config) {
        Ok(guards) => Some(guards),
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    };

    // process::exit skips destructors; flush the log file first.
    drop(guards);
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let (binary, args) = cli.into_parts()?;
    let config = ExecConfig::from_env()?;
    let workdir = std::env::current_dir()
        .map_err(|e| anyhow!("cannot determine working directory: {}", e))?;
    debug!("running {} from {}", binary.display(), workdir.display());

    let job = Job::new(binary, args, workdir);
    let lock = FileLock::relay(&config.state_dir);
    let session = Session::new(
        Arc::new(AdbRelay::from_config(&config)),
        GoToolchain::new(),
        &config,
    );
    Ok(session.run_exclusive(lock, &job).await?)
}
