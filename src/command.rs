//! # command module
//!
//! Thin wrapper around `tokio::process` for the collectors that scrape other
//! tools' output (zpool, smbstatus, psql, occ and the text_blob shell commands).

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::process::Output;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::envelope::ExtendError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a shell command where a nonzero exit is data, not an error
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShellOutcome {
    pub stdout: String,
    pub exit_code: i32,
    pub signal: i32,
    pub core_dumped: bool,
}

fn display_command(program: &str, args: &[String]) -> String {
    match args.is_empty() {
        true => program.to_string(),
        false => format!("{} {}", program, args.join(" ")),
    }
}

async fn output_with_timeout(
    mut command: Command,
    shown: &str,
    timeout: Duration,
) -> Result<Output, ExtendError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!("Running `{}`", shown);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(ExtendError::Command {
            command: shown.to_string(),
            reason: err.to_string(),
        }),
        Err(_) => Err(ExtendError::Command {
            command: shown.to_string(),
            reason: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

/// Run a program and return its stdout. A nonzero exit is an error carrying stderr
pub async fn run(
    program: &str,
    args: &[String],
    envs: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<String, ExtendError> {
    let shown = display_command(program, args);
    let mut command = Command::new(program);
    command.args(args).envs(envs);
    let output = output_with_timeout(command, &shown, timeout).await?;
    if !output.status.success() {
        return Err(ExtendError::Command {
            command: shown,
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command line through `/bin/sh -c` and report how it ended
pub async fn run_shell(
    cmdline: &str,
    envs: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<ShellOutcome, ExtendError> {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(cmdline).envs(envs);
    let output = output_with_timeout(command, cmdline, timeout).await?;
    Ok(ShellOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        signal: output.status.signal().unwrap_or(0),
        core_dumped: output.status.core_dumped(),
    })
}
