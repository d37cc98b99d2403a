//! End-to-end collection over a one-machine cluster with scripted
//! collaborators: the control plane serves fixture status documents and the
//! transport hands back a prepared per-machine archive.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use clusterdump_engine::{Collector, CollectorConfig, ControlPlane};
use clusterdump_types::{Endpoint, ModelStatus, StatusDocument};
use clusterdump_util::{Compression, Transport, unpack};

const CLUSTER_STATUS: &str = r#"
model:
  name: testing
  type: iaas
machines:
  "0":
    dns-name: 10.0.0.5
    ip-addresses: [10.0.0.5]
applications:
  app:
    units:
      app/0:
        public-address: 10.0.0.5
"#;

struct FixtureControlPlane {
    status: &'static str,
}

impl Default for FixtureControlPlane {
    fn default() -> Self {
        Self { status: CLUSTER_STATUS }
    }
}

#[async_trait]
impl ControlPlane for FixtureControlPlane {
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    async fn cluster_status_yaml(&self) -> Result<String> {
        Ok(self.status.to_string())
    }

    async fn controller_status_yaml(&self) -> Result<String> {
        bail!("controller model not reachable in tests")
    }

    async fn auxiliary_snapshots(&self, dir: &Path, exclude: &[String], _model: &ModelStatus) {
        if !exclude.iter().any(|x| x == "model_config.yaml") {
            std::fs::write(dir.join("model_config.yaml"), b"test-mode: true\n").expect("snapshot write");
        }
    }
}

struct UnreachableControlPlane;

#[async_trait]
impl ControlPlane for UnreachableControlPlane {
    async fn verify(&self) -> Result<()> {
        bail!("no controller credentials")
    }
    async fn cluster_status_yaml(&self) -> Result<String> {
        unreachable!("verify fails first")
    }
    async fn controller_status_yaml(&self) -> Result<String> {
        unreachable!("verify fails first")
    }
    async fn auxiliary_snapshots(&self, _dir: &Path, _exclude: &[String], _model: &ModelStatus) {}
}

/// Transport double: remote commands succeed and are recorded; pulls serve
/// a prepared archive (or fail when none is configured). Commands matching
/// `fail_commands_containing` exit non-zero.
#[derive(Default)]
struct ScriptedTransport {
    commands: Mutex<Vec<String>>,
    archive: Option<PathBuf>,
    fail_commands_containing: Option<String>,
    pulls: AtomicUsize,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn run(&self, _endpoint: &Endpoint, command: &str) -> Result<()> {
        self.commands.lock().expect("commands lock").push(command.to_string());
        if let Some(needle) = &self.fail_commands_containing {
            if command.contains(needle.as_str()) {
                bail!("scripted failure for command matching '{needle}'");
            }
        }
        Ok(())
    }

    async fn push(&self, _endpoint: &Endpoint, _local: &Path, _remote: &str) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, _endpoint: &Endpoint, _remote: &str, local: &Path) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        match &self.archive {
            Some(archive) => {
                std::fs::copy(archive, local)?;
                Ok(())
            }
            None => bail!("scripted retrieval failure"),
        }
    }

    async fn pipe(&self, _endpoint: &Endpoint, local_command: &str, _remote_dir: &str, _remote_file: &str) -> Result<()> {
        self.commands.lock().expect("commands lock").push(local_command.to_string());
        Ok(())
    }
}

/// Build the archive a machine would produce: addon output plus a log file.
fn machine_archive(dir: &Path) -> PathBuf {
    let content = dir.join("content");
    std::fs::create_dir_all(content.join("addon_output")).expect("mkdir");
    std::fs::write(content.join("addon_output/ping.txt"), b"pong\n").expect("write");
    let archive = dir.join("machine.tar");
    let status = std::process::Command::new("tar")
        .args(["-pcf"])
        .arg(&archive)
        .args(["-C"])
        .arg(&content)
        .arg(".")
        .status()
        .expect("tar runs");
    assert!(status.success());
    archive
}

fn config(output_dir: &Path) -> CollectorConfig {
    CollectorConfig {
        uniq: "test-run".to_string(),
        output_dir: output_dir.to_path_buf(),
        compression: Compression::Gzip,
        timeout: Duration::from_secs(5),
        ..CollectorConfig::default()
    }
}

#[tokio::test]
async fn produces_a_bundle_with_machine_directory_and_unit_alias() {
    let fixtures = tempfile::tempdir().expect("tempdir");
    let out = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport {
        archive: Some(machine_archive(fixtures.path())),
        ..Default::default()
    });

    let mut cfg = config(out.path());
    cfg.enabled_addons = vec!["ps-mem".to_string()];
    cfg.journals = vec!["sshd".to_string()];
    let collector = Collector::new(cfg, Arc::new(FixtureControlPlane::default()), Arc::clone(&transport) as Arc<dyn Transport>);
    let bundle = collector.collect().await.expect("collection succeeds");

    assert_eq!(
        bundle.file_name().and_then(|n| n.to_str()),
        Some("clusterdump-test-run.tar.gz")
    );
    assert!(bundle.exists());

    // The mocked machine saw the addon, journal and capture commands.
    let commands = transport.commands.lock().expect("commands lock");
    assert!(commands.iter().any(|c| c.contains("ps_mem.txt")));
    assert!(commands.iter().any(|c| c.contains("journalctl -u sshd")));
    assert!(commands.iter().any(|c| c.contains("cluster-dump-test-run.tar")));
    drop(commands);

    let dest = tempfile::tempdir().expect("tempdir");
    unpack(&bundle, dest.path()).await.expect("bundle unpacks");
    let root = dest.path().join("test-run");
    assert!(root.join("cluster_status.yaml").exists());
    assert!(root.join("model_config.yaml").exists());
    assert!(root.join("0/baremetal/addon_output/ping.txt").exists());
    assert_eq!(
        std::fs::read_link(root.join("app_0")).expect("unit alias exists"),
        PathBuf::from("0/baremetal")
    );
    assert!(root.join("app_0/addon_output/ping.txt").exists());
}

#[tokio::test]
async fn retrieval_failure_still_produces_a_best_effort_bundle() {
    let out = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::default());

    let collector = Collector::new(config(out.path()), Arc::new(FixtureControlPlane::default()), transport as Arc<dyn Transport>);
    let bundle = collector.collect().await.expect("collection still succeeds");

    let dest = tempfile::tempdir().expect("tempdir");
    unpack(&bundle, dest.path()).await.expect("bundle unpacks");
    let root = dest.path().join("test-run");
    assert!(root.join("cluster_status.yaml").exists());
    // Missing machine data manifests as absent directories, not errors.
    assert!(!root.join("0").exists());
    assert!(root.join("app_0").symlink_metadata().is_err());
}

#[tokio::test]
async fn failed_capture_skips_retrieval_for_that_machine() {
    let fixtures = tempfile::tempdir().expect("tempdir");
    let out = tempfile::tempdir().expect("tempdir");
    // The capture command fails even though an archive would be available.
    let transport = Arc::new(ScriptedTransport {
        archive: Some(machine_archive(fixtures.path())),
        fail_commands_containing: Some("cluster-dump".to_string()),
        ..Default::default()
    });

    let collector = Collector::new(
        config(out.path()),
        Arc::new(FixtureControlPlane::default()),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    let bundle = collector.collect().await.expect("collection still succeeds");

    // No pull is attempted for a machine without an archive.
    assert_eq!(transport.pulls.load(Ordering::SeqCst), 0);

    let dest = tempfile::tempdir().expect("tempdir");
    unpack(&bundle, dest.path()).await.expect("bundle unpacks");
    let root = dest.path().join("test-run");
    assert!(root.join("cluster_status.yaml").exists());
    assert!(!root.join("0").exists());
}

#[tokio::test]
async fn addressless_container_parents_are_not_pulled() {
    const NESTED_STATUS: &str = r#"
model:
  name: testing
  type: iaas
machines:
  "0":
    containers:
      0/lxd/0:
        dns-name: 10.0.0.6
        ip-addresses: [10.0.0.6]
"#;
    let fixtures = tempfile::tempdir().expect("tempdir");
    let out = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport {
        archive: Some(machine_archive(fixtures.path())),
        ..Default::default()
    });

    let collector = Collector::new(
        config(out.path()),
        Arc::new(FixtureControlPlane { status: NESTED_STATUS }),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    let bundle = collector.collect().await.expect("collection succeeds");

    // The parent machine has no address and no target; only the container
    // is pulled from.
    assert_eq!(transport.pulls.load(Ordering::SeqCst), 1);

    let dest = tempfile::tempdir().expect("tempdir");
    unpack(&bundle, dest.path()).await.expect("bundle unpacks");
    let root = dest.path().join("test-run");
    assert!(root.join("0/lxd/0/addon_output/ping.txt").exists());
    assert!(!root.join("0/baremetal").exists());
}

#[tokio::test]
async fn unreachable_control_plane_aborts_the_run() {
    let out = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::default());
    let collector = Collector::new(config(out.path()), Arc::new(UnreachableControlPlane), transport as Arc<dyn Transport>);
    let error = collector.collect().await.expect_err("must abort");
    assert!(format!("{error:#}").contains("unreachable"));
    assert!(std::fs::read_dir(out.path()).expect("readable").next().is_none());
}
