//! The remote transport seam: run a command on a host, copy files to and
//! from it, optionally through an intermediate hop.
//!
//! `Transport` is the sole network-facing contract of the collector. The
//! production implementation shells out to `ssh`/`scp`; tests swap in a
//! scripted double. Timeouts are enforced by the caller (the fan-out pool),
//! not here.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clusterdump_types::Endpoint;

use crate::command::{shell_quote, shell_result, shell_to_file};

/// Options applied to every ssh/scp invocation. Host keys are not checked:
/// the collector talks to short-lived machines the operator already trusts.
const SSH_OPTIONS: &str = "-o StrictHostKeyChecking=no -o LogLevel=ERROR";

/// Remote command and file-copy primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a shell command on the host. `Ok` only for exit code zero.
    async fn run(&self, endpoint: &Endpoint, command: &str) -> Result<()>;

    /// Recursively copy the contents of a local directory to a remote directory.
    async fn push(&self, endpoint: &Endpoint, local: &Path, remote: &str) -> Result<()>;

    /// Copy a remote file back to a local path.
    async fn pull(&self, endpoint: &Endpoint, remote: &str, local: &Path) -> Result<()>;

    /// Run a local command and stream its stdout into a file on the host,
    /// creating the containing directory first.
    async fn pipe(&self, endpoint: &Endpoint, local_command: &str, remote_dir: &str, remote_file: &str) -> Result<()>;
}

/// `ssh`/`scp`-backed transport.
#[derive(Debug, Default)]
pub struct SshTransport;

impl SshTransport {
    fn ssh_prefix(endpoint: &Endpoint) -> String {
        match &endpoint.via {
            Some(hop) => format!("ssh {SSH_OPTIONS} -J {hop} {}", endpoint.host),
            None => format!("ssh {SSH_OPTIONS} {}", endpoint.host),
        }
    }

    fn scp_prefix(endpoint: &Endpoint) -> String {
        match &endpoint.via {
            Some(hop) => format!("scp {SSH_OPTIONS} -J {hop}"),
            None => format!("scp {SSH_OPTIONS}"),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(&self, endpoint: &Endpoint, command: &str) -> Result<()> {
        shell_result(&format!("{} {}", Self::ssh_prefix(endpoint), shell_quote(command))).await
    }

    async fn push(&self, endpoint: &Endpoint, local: &Path, remote: &str) -> Result<()> {
        shell_result(&format!(
            "{} -r {}/. {}:{remote}",
            Self::scp_prefix(endpoint),
            local.display(),
            endpoint.host,
        ))
        .await
    }

    async fn pull(&self, endpoint: &Endpoint, remote: &str, local: &Path) -> Result<()> {
        shell_result(&format!(
            "{} {}:{remote} {}",
            Self::scp_prefix(endpoint),
            endpoint.host,
            local.display(),
        ))
        .await
    }

    async fn pipe(&self, endpoint: &Endpoint, local_command: &str, remote_dir: &str, remote_file: &str) -> Result<()> {
        // Captured to a local file first: a bare pipeline would report only
        // ssh's exit status, masking a failing local command.
        let staged = tempfile::NamedTempFile::new().context("failed to create pipe staging file")?;
        shell_to_file(local_command, staged.path()).await?;
        let sink = shell_quote(&format!("mkdir -p {remote_dir}; cat > {remote_dir}/{remote_file}"));
        shell_result(&format!(
            "cat {} | {} {sink}",
            staged.path().display(),
            Self::ssh_prefix(endpoint),
        ))
        .await
    }
}
