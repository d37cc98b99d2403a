//! The collection orchestrator: drives one run from connectivity check to
//! the final compressed bundle.
//!
//! Stages run strictly in sequence. Only the initial connectivity check
//! and the final packaging are fatal; everything per-target is logged and
//! skipped so the run always produces a best-effort bundle. All local
//! scratch state lives in a temporary directory that is removed when the
//! run ends, successful or not.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clusterdump_types::{CollectionContext, StatusDocument, Target};
use clusterdump_util::{CapturePaths, Compression, DEFAULT_MAX_FILE_SIZE, Transport};
use tracing::{info, warn};
use uuid::Uuid;

use crate::addon::{self, AddonEngine};
use crate::fanout::{DEFAULT_POOL_WIDTH, FanOut, FanOutReport, FanOutTask};
use crate::snapshot::ControlPlane;
use crate::topology::{self, Topology};

/// Everything configurable about one collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Unique run identifier; also the bundle's top-level directory name.
    pub uniq: String,
    /// Where the finished bundle is moved to.
    pub output_dir: PathBuf,
    /// Per-file size ceiling for remote capture, in bytes.
    pub max_file_size: u64,
    /// Operator-supplied extra capture paths.
    pub extra_dirs: Vec<String>,
    /// Exclude patterns for capture, also keyed against snapshot names.
    pub exclude: Vec<String>,
    /// Names of addons to run.
    pub enabled_addons: Vec<String>,
    /// Addon definition files layered over the built-ins.
    pub addon_files: Vec<PathBuf>,
    /// Compression of the final bundle.
    pub compression: Compression,
    /// Per-attempt timeout for remote commands.
    pub timeout: Duration,
    /// systemd units whose journals are captured on every machine.
    pub journals: Vec<String>,
    /// Remote staging root on every machine.
    pub dump_location: String,
    /// Elevated authorization: run capture as root, allow local/sudo addons.
    pub as_root: bool,
    /// Skip the heavyweight agent state directory.
    pub small: bool,
    /// Remote login user.
    pub ssh_user: String,
    /// Identity staged into the SSH agent at run start.
    pub ssh_key: Option<PathBuf>,
    /// Fan-out worker-pool width.
    pub pool_width: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            uniq: Uuid::new_v4().to_string(),
            output_dir: PathBuf::from("."),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            extra_dirs: Vec::new(),
            exclude: Vec::new(),
            enabled_addons: Vec::new(),
            addon_files: Vec::new(),
            compression: Compression::default(),
            timeout: Duration::from_secs(45),
            journals: Vec::new(),
            dump_location: "/tmp".to_string(),
            as_root: false,
            small: false,
            ssh_user: "ubuntu".to_string(),
            ssh_key: None,
            pool_width: DEFAULT_POOL_WIDTH,
        }
    }
}

/// One-shot diagnostic bundle collector.
pub struct Collector {
    config: CollectorConfig,
    control_plane: Arc<dyn ControlPlane>,
    transport: Arc<dyn Transport>,
}

impl Collector {
    pub fn new(config: CollectorConfig, control_plane: Arc<dyn ControlPlane>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            control_plane,
            transport,
        }
    }

    /// Run the whole collection sequence, returning the bundle path.
    pub async fn collect(&self) -> Result<PathBuf> {
        let config = &self.config;

        // Stage 1: the only pre-flight failure that aborts the run.
        self.control_plane.verify().await.context("cluster control plane is unreachable")?;
        if let Some(key) = &config.ssh_key {
            clusterdump_util::stage_ssh_key(key).await;
        }

        let scratch = tempfile::tempdir().context("failed to create local scratch directory")?;
        let stage_dir = scratch.path().join(&config.uniq);
        std::fs::create_dir_all(&stage_dir).context("failed to create staging directory")?;

        // Stage 2: snapshots. The cluster status fetch is the one fatal piece.
        let status_yaml = self
            .control_plane
            .cluster_status_yaml()
            .await
            .context("cluster status fetch failed")?;
        std::fs::write(stage_dir.join("cluster_status.yaml"), &status_yaml).context("failed to write status snapshot")?;
        let status: StatusDocument = serde_yaml::from_str(&status_yaml).context("cluster status is not parseable")?;
        let controller = self.controller_status(&stage_dir).await;
        self.control_plane
            .auxiliary_snapshots(&stage_dir, &config.exclude, &status.model)
            .await;

        // Stage 3: topology and the fan-out target set.
        let topology = topology::resolve(&status)?;
        let targets = topology::targets(&status, &controller, &config.ssh_user);
        info!(machines = targets.len(), run = %config.uniq, "resolved collection targets");

        let fanout = FanOut::new(Arc::clone(&self.transport), config.timeout, config.pool_width);
        let context = CollectionContext::new(&config.uniq, &config.dump_location);

        if targets.is_empty() {
            warn!("0 machines found, nothing to capture");
        } else {
            self.run_addons(&fanout, &context, &topology, &targets).await?;
            self.run_journals(&fanout, &context, &targets).await;
            let capture = self.create_machine_archives(&fanout, &targets).await;
            self.retrieve_machine_archives(&fanout, &topology, &targets, &capture, &stage_dir).await;
        }

        // Stage 8: package, move, clean up. Scratch removal rides on Drop,
        // so it happens on the failure paths above as well.
        let bundle_name = format!("clusterdump-{}.tar.{}", config.uniq, config.compression.extension());
        let package_dir = tempfile::tempdir().context("failed to create packaging directory")?;
        let packaged = package_dir.path().join(&bundle_name);
        clusterdump_util::pack(scratch.path(), &packaged)
            .await
            .context("failed to package the bundle")?;
        std::fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("failed to create output directory {}", config.output_dir.display()))?;
        let destination = config.output_dir.join(&bundle_name);
        move_file(&packaged, &destination).context("failed to move the bundle to the output directory")?;
        info!(bundle = %destination.display(), "collection finished");
        Ok(destination)
    }

    async fn controller_status(&self, stage_dir: &Path) -> StatusDocument {
        match self.control_plane.controller_status_yaml().await {
            Ok(text) => {
                if let Err(error) = std::fs::write(stage_dir.join("controller_status.yaml"), &text) {
                    warn!(%error, "failed to write controller status snapshot");
                }
                serde_yaml::from_str(&text).unwrap_or_else(|error| {
                    warn!(%error, "controller status is not parseable, no jump routes");
                    StatusDocument::default()
                })
            }
            Err(error) => {
                warn!(%error, "controller status unavailable, no jump routes");
                StatusDocument::default()
            }
        }
    }

    /// Stage 4: enabled addons, layered and policy-filtered.
    async fn run_addons(&self, fanout: &FanOut, context: &CollectionContext, topology: &Topology, targets: &[Target]) -> Result<()> {
        if self.config.enabled_addons.is_empty() {
            return Ok(());
        }
        let available = addon::load_addons(&self.config.addon_files)?;
        let enabled = addon::select_enabled(&available, &self.config.enabled_addons, self.config.as_root)?;
        if enabled.is_empty() {
            return Ok(());
        }

        let units = unit_targets(topology, targets);
        let engine = AddonEngine::new(fanout, context.clone());
        engine.prepare(targets).await;
        for definition in &enabled {
            info!(addon = %definition.name, "running addon");
            engine.run(definition, targets, &units).await?;
        }
        Ok(())
    }

    /// Stage 5: journal captures for requested systemd units.
    async fn run_journals(&self, fanout: &FanOut, context: &CollectionContext, targets: &[Target]) {
        for service in &self.config.journals {
            let logdir = format!("{}/journalctl", context.output);
            let logfile = format!("{logdir}/{service}.log");
            let command = format!(
                "mkdir -p {logdir}; journalctl -u {service} > {logfile}; \
                 [ \"$(head -1 {logfile})\" = \"-- No entries --\" ] && rm {logfile}; true"
            );
            let tasks = targets.iter().map(|t| FanOutTask::shell(t.clone(), command.clone())).collect();
            fanout.dispatch(tasks).await;
        }
    }

    /// Stage 6: build one tar per machine at a known remote path. The
    /// returned report says which machines actually have an archive.
    async fn create_machine_archives(&self, fanout: &FanOut, targets: &[Target]) -> FanOutReport {
        let config = &self.config;
        let staging = format!("mkdir -p {}/{}", config.dump_location, config.uniq);
        let tasks = targets.iter().map(|t| FanOutTask::shell(t.clone(), staging.clone())).collect();
        fanout.dispatch(tasks).await;

        let paths = CapturePaths::assemble(config.small, &config.extra_dirs);
        let capture = clusterdump_util::remote_capture_command(
            &config.dump_location,
            &config.uniq,
            paths.as_slice(),
            config.max_file_size,
            &config.exclude,
            config.as_root,
        );
        let tasks = targets.iter().map(|t| FanOutTask::shell(t.clone(), capture.clone())).collect();
        let report = fanout.dispatch(tasks).await;
        if !report.all_succeeded() {
            let failed: Vec<&str> = report.failed_targets().collect();
            warn!(machines = ?failed, "capture failed on some machines, their data will be missing");
        }
        report
    }

    /// Stage 7: pull every captured machine's archive, unpack it, create
    /// unit aliases. Machines whose capture failed, and topology entries
    /// that never became a target (addressless container parents), are not
    /// pulled from at all.
    async fn retrieve_machine_archives(
        &self,
        fanout: &FanOut,
        topology: &Topology,
        targets: &[Target],
        capture: &FanOutReport,
        stage_dir: &Path,
    ) {
        if topology.is_empty() {
            warn!("empty topology, no archives to retrieve");
            return;
        }
        let target_map: HashMap<&str, &Target> = targets.iter().map(|t| (t.id.as_str(), t)).collect();
        let remote = clusterdump_util::remote_archive_path(&self.config.dump_location, &self.config.uniq);

        let mut pulls = Vec::new();
        let mut attempted = Vec::new();
        for machine in topology.keys() {
            let Some(target) = target_map.get(machine.as_str()) else {
                continue;
            };
            if !capture.succeeded(machine) {
                continue;
            }
            pulls.push(FanOutTask::pull((*target).clone(), remote.clone(), retrieved_tar_path(stage_dir, machine)));
            attempted.push(machine);
        }
        fanout.dispatch(pulls).await;

        for machine in attempted {
            let aliases = &topology[machine.as_str()];
            let tar = retrieved_tar_path(stage_dir, machine);
            let machine_dir = machine_directory(machine);
            if !tar.exists() {
                warn!(machine = %machine, "unable to retrieve archive, skipping");
                continue;
            }
            match clusterdump_util::unpack(&tar, &stage_dir.join(&machine_dir)).await {
                Ok(()) => {
                    let _ = std::fs::remove_file(&tar);
                    create_aliases(stage_dir, &machine_dir, aliases.iter().map(String::as_str));
                }
                Err(error) => {
                    warn!(machine = %machine, %error, "unable to unpack archive, skipping");
                    let _ = std::fs::remove_file(&tar);
                }
            }
        }
    }
}

/// Pair every unit with the target of the machine hosting it.
fn unit_targets(topology: &Topology, targets: &[Target]) -> Vec<(String, Target)> {
    let target_map: HashMap<&str, &Target> = targets.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut units = Vec::new();
    for (machine, names) in topology {
        let Some(target) = target_map.get(machine.as_str()) else {
            continue;
        };
        for name in names {
            // Unit identifiers carry a slash; plain addresses do not.
            if name.contains('/') {
                units.push((name.clone(), (*target).clone()));
            }
        }
    }
    units
}

/// Bundle directory for one machine. Top-level machines get a suffix so
/// their directory cannot collide with a container id prefix.
fn machine_directory(machine: &str) -> String {
    if machine.contains('/') {
        machine.to_string()
    } else {
        format!("{machine}/baremetal")
    }
}

fn retrieved_tar_path(stage_dir: &Path, machine: &str) -> PathBuf {
    stage_dir.join(format!("retrieved-{}.tar", machine.replace('/', "_")))
}

/// Symlink every alias name to the machine directory so the bundle can be
/// browsed by unit name. First writer wins: an alias colliding with an
/// existing path is skipped with a warning.
fn create_aliases<'a>(stage_dir: &Path, machine_dir: &str, aliases: impl Iterator<Item = &'a str>) {
    for alias in aliases {
        let link = stage_dir.join(alias.replace('/', "_"));
        if link.symlink_metadata().is_ok() {
            warn!(alias, machine_dir, "alias collides with an existing path, skipping");
            continue;
        }
        #[cfg(unix)]
        if let Err(error) = std::os::unix::fs::symlink(machine_dir, &link) {
            warn!(alias, %error, "failed to create alias");
        }
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy + remove.
    std::fs::copy(from, to).with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    std::fs::remove_file(from).ok();
    Ok(())
}
