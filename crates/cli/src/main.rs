//! clusterdump binary: argument parsing and collaborator wiring.
//!
//! Exit status is non-zero only for the fatal failure categories
//! (connectivity, final packaging); individual machines failing still ends
//! the run with a best-effort bundle and exit code zero.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use clusterdump_engine::{CliControlPlane, Collector, CollectorConfig, extend_with_elevated_defaults};
use clusterdump_util::{Compression, DEFAULT_MAX_FILE_SIZE, SshTransport};
use tracing::info;
use uuid::Uuid;

/// Collect logs, configuration and state from every machine of a cluster
/// into one compressed bundle for offline triage.
#[derive(Debug, Parser)]
#[command(name = "clusterdump", version, about)]
struct Cli {
    /// Cluster/model to act on.
    #[arg(short, long)]
    model: Option<String>,

    /// Control-plane CLI program used for status queries.
    #[arg(long, default_value = "juju")]
    cluster_cli: String,

    /// Max size (bytes) for individual captured files.
    #[arg(short = 'f', long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    /// Store the completed bundle in this directory.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Unique id for this run; generated when not given.
    #[arg(short, long)]
    uniq: Option<String>,

    /// Make a small bundle by skipping the agent state directory.
    #[arg(short, long)]
    small: bool,

    /// Enable the addon with the given name (repeatable).
    #[arg(short = 'a', long = "addon")]
    addons: Vec<String>,

    /// Additional addon definition files, layered over the built-ins.
    #[arg(long = "addons-file")]
    addons_files: Vec<PathBuf>,

    /// Directories or files to exclude from capture (repeatable).
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Compression for the result bundle (xz, gz, bz2, zst).
    #[arg(short, long, default_value = "xz")]
    compression: Compression,

    /// Timeout in seconds for each remote command.
    #[arg(short, long, default_value_t = 45)]
    timeout: u64,

    /// Capture the journal of the systemd unit with this name (repeatable).
    #[arg(short = 'j', long = "journalctl")]
    journals: Vec<String>,

    /// Remote staging directory on the machines.
    #[arg(long, default_value = "/tmp")]
    unit_dump_location: String,

    /// Collect as root; also required for addons with local or sudo commands.
    #[arg(long)]
    as_root: bool,

    /// SSH identity staged into the agent before collecting.
    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// Remote login user.
    #[arg(long, default_value = "ubuntu")]
    ssh_user: String,

    /// Default logging level (RUST_LOG overrides).
    #[arg(short = 'l', long, default_value = "info")]
    logging_level: String,

    /// Extra directories to capture.
    extra_dir: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.logging_level);
    info!("clusterdump started");

    let mut enabled_addons = cli.addons;
    if cli.as_root {
        // Root runs always include the process and socket listings.
        extend_with_elevated_defaults(&mut enabled_addons);
    }

    let config = CollectorConfig {
        uniq: cli.uniq.unwrap_or_else(|| Uuid::new_v4().to_string()),
        output_dir: cli.output_dir,
        max_file_size: cli.max_file_size,
        extra_dirs: cli.extra_dir,
        exclude: cli.exclude,
        enabled_addons,
        addon_files: cli.addons_files,
        compression: cli.compression,
        timeout: Duration::from_secs(cli.timeout),
        journals: cli.journals,
        dump_location: cli.unit_dump_location,
        as_root: cli.as_root,
        small: cli.small,
        ssh_user: cli.ssh_user,
        ssh_key: cli.ssh_key,
        ..CollectorConfig::default()
    };

    let control_plane = Arc::new(CliControlPlane::new(cli.cluster_cli, cli.model));
    let collector = Collector::new(config, control_plane, Arc::new(SshTransport));
    let bundle = collector.collect().await?;
    println!("{}", bundle.display());
    info!("clusterdump finished");
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
