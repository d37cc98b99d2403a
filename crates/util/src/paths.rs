//! The capture-path list: which filesystem paths are pulled from every
//! machine.
//!
//! Assembled exactly once per run into an immutable value: base list,
//! conditional state directory, operator extras, then the container-rootfs
//! mirrors of everything gathered so far, and finally the staging directory
//! itself so addon and log output is captured too.

/// Default per-file size ceiling in bytes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5_000_000;

/// Paths captured from every machine.
const BASE_DIRECTORIES: &[&str] = &[
    "/etc/alternatives",
    "/etc/ceph",
    "/etc/cloud",
    "/etc/corosync",
    "/etc/netplan",
    "/etc/network",
    "/etc/udev/rules.d",
    "/lib/udev/rules.d",
    "/run/cloud-init",
    "/usr/share/lxc/config",
    "/var/lib/charm",
    "/var/lib/cloud/seed",
    "/var/log",
    "/var/crash",
    "/var/snap/lxd/common/lxd/logs/",
];

/// The heavyweight agent state directory, skipped by small runs.
const STATE_DIRECTORY: &str = "/var/lib/juju";

/// Container filesystems are mounted under this prefix on the host.
const CONTAINER_ROOTFS_PREFIX: &str = "/var/lib/lxd/containers/*/rootfs";

/// Immutable capture-path configuration for one run.
#[derive(Debug, Clone)]
pub struct CapturePaths {
    paths: Vec<String>,
}

impl CapturePaths {
    /// Assemble the run's capture list.
    ///
    /// `small` drops the agent state directory; `extra` appends operator
    /// paths. Every path is mirrored under the container-rootfs prefix so
    /// workloads inside containers are captured from the host side as well.
    pub fn assemble(small: bool, extra: &[String]) -> Self {
        let mut paths: Vec<String> = BASE_DIRECTORIES.iter().map(|p| p.to_string()).collect();
        if !small {
            paths.push(STATE_DIRECTORY.to_string());
        }
        paths.extend(extra.iter().cloned());

        let mirrors: Vec<String> = paths.iter().map(|p| format!("{CONTAINER_ROOTFS_PREFIX}{p}")).collect();
        paths.extend(mirrors);
        paths.push(".".to_string());

        Self { paths }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.paths
    }
}
