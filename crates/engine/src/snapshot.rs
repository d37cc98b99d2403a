//! The control-plane seam: connectivity verification, status documents,
//! and local snapshot files.
//!
//! `ControlPlane` keeps the status query out of the core so tests can feed
//! fixture documents; the production implementation shells out to the
//! platform CLI (`juju` by default).

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clusterdump_types::ModelStatus;
use tracing::{debug, info, warn};

use clusterdump_util::{shell_result, shell_to_file};

/// Status query and snapshot collaborator.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Verify connectivity and authentication. Failure aborts the run.
    async fn verify(&self) -> Result<()>;

    /// Raw cluster status document (YAML text).
    async fn cluster_status_yaml(&self) -> Result<String>;

    /// Raw controller status document (YAML text).
    async fn controller_status_yaml(&self) -> Result<String>;

    /// Write the auxiliary snapshot files into `dir`.
    ///
    /// Each artifact is individually skippable through `exclude` (by file
    /// name) and individually non-fatal on failure.
    async fn auxiliary_snapshots(&self, dir: &Path, exclude: &[String], model: &ModelStatus);
}

/// Control plane backed by the platform CLI.
pub struct CliControlPlane {
    program: String,
    model: Option<String>,
}

impl CliControlPlane {
    pub fn new(program: impl Into<String>, model: Option<String>) -> Self {
        Self {
            program: program.into(),
            model,
        }
    }

    fn cli(&self, args: &str) -> String {
        match &self.model {
            Some(model) => format!("{} -m {model} {args}", self.program),
            None => format!("{} {args}", self.program),
        }
    }

    async fn capture(&self, command: &str) -> Result<String> {
        debug!(command, "capturing control plane output");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn: {command}"))?;
        if !output.status.success() {
            anyhow::bail!("command exited with {:?}: {command}", output.status.code());
        }
        String::from_utf8(output.stdout).with_context(|| format!("non-utf8 output from: {command}"))
    }
}

#[async_trait]
impl ControlPlane for CliControlPlane {
    async fn verify(&self) -> Result<()> {
        shell_result(&format!("{} version", self.program))
            .await
            .context("control plane CLI is not available")?;
        shell_result(&self.cli("switch"))
            .await
            .context("no cluster is selected or it is unreachable")?;
        Ok(())
    }

    async fn cluster_status_yaml(&self) -> Result<String> {
        self.capture(&self.cli("status --format=yaml")).await
    }

    async fn controller_status_yaml(&self) -> Result<String> {
        // Always the controller model, regardless of the selected one.
        self.capture(&format!("{} status -m controller --format=yaml", self.program)).await
    }

    async fn auxiliary_snapshots(&self, dir: &Path, exclude: &[String], model: &ModelStatus) {
        let snapshots: &[(&str, String)] = &[
            ("cluster_status.txt", self.cli("status --format=tabular --relations --storage")),
            ("model_config.yaml", self.cli("model-config --format=yaml")),
            ("storage.yaml", self.cli("storage --format=yaml")),
            ("storage_pools.yaml", self.cli("storage-pools --format=yaml")),
            ("debug_log.txt", self.cli("debug-log --date --replay --no-tail")),
        ];
        for (name, command) in snapshots {
            if exclude.iter().any(|x| x == name) {
                info!(snapshot = name, "skipping excluded snapshot");
                continue;
            }
            if let Err(error) = shell_to_file(command, &dir.join(name)).await {
                warn!(snapshot = name, %error, "snapshot failed, continuing");
            }
        }

        // Container-substrate models also get a pod listing when the local
        // kubectl is usable.
        if model.kind == "caas"
            && std::env::var_os("KUBECONFIG").is_some()
            && shell_result("command -v kubectl").await.is_ok()
        {
            let command = format!("kubectl -n {} get pods", model.name);
            if let Err(error) = shell_to_file(&command, &dir.join("pods.txt")).await {
                warn!(%error, "pod listing failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_selector_threads_into_every_command() {
        let plane = CliControlPlane::new("juju", Some("staging".into()));
        assert_eq!(plane.cli("status --format=yaml"), "juju -m staging status --format=yaml");
        let bare = CliControlPlane::new("juju", None);
        assert_eq!(bare.cli("switch"), "juju switch");
    }
}
