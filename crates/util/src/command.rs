//! Local shell command execution.
//!
//! Everything the collector does locally goes through `sh -c` so command
//! text can use pipes and globs the same way the remote side does. The
//! logging variant converts failure into a boolean so best-effort call
//! sites never have to unwind.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, warn};

/// Run a shell command, returning `Err` on spawn failure or non-zero exit.
///
/// Quiet: callers decide whether the failure is worth a log line. The child
/// is killed when the future is dropped, so a caller-imposed timeout ends
/// the process instead of orphaning it.
pub async fn shell_result(command: &str) -> Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("failed to spawn: {command}"))?;
    if !status.success() {
        bail!("command exited with {:?}: {command}", status.code());
    }
    Ok(())
}

/// Run a shell command, logging a warning on failure and reporting success.
pub async fn shell_ok(command: &str) -> bool {
    debug!(command, "running local command");
    match shell_result(command).await {
        Ok(()) => true,
        Err(error) => {
            warn!(command, %error, "local command failed");
            false
        }
    }
}

/// Run a shell command with the given working directory, logging on failure.
pub async fn shell_ok_in(command: &str, dir: &Path) -> bool {
    debug!(command, dir = %dir.display(), "running local command");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(command, code = ?status.code(), "local command failed");
            false
        }
        Err(error) => {
            warn!(command, %error, "local command could not be spawned");
            false
        }
    }
}

/// Run a shell command and write its stdout to `dest`.
///
/// Non-zero exit is an error; stderr is discarded.
pub async fn shell_to_file(command: &str, dest: &Path) -> Result<()> {
    debug!(command, dest = %dest.display(), "capturing local command output");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn: {command}"))?;
    if !output.status.success() {
        bail!("command exited with {:?}: {command}", output.status.code());
    }
    tokio::fs::write(dest, &output.stdout)
        .await
        .with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(())
}

/// Stage a pre-provisioned SSH identity into the running agent.
///
/// Best effort: a missing key file or absent agent only logs a warning.
pub async fn stage_ssh_key(key: &Path) {
    if !key.exists() {
        warn!(key = %key.display(), "ssh identity not found, skipping agent staging");
        return;
    }
    shell_ok(&format!("ssh-add {}", key.display())).await;
}

/// Wrap text in single quotes for safe embedding in a shell command line.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
