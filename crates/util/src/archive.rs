//! Archive plumbing: the remote capture command, local unpack, and final
//! bundle packaging.
//!
//! Archiving itself is delegated to the system `tar`; this module only
//! builds the command lines (size ceiling, exclude patterns, compression by
//! extension) and runs them through the local shell.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use thiserror::Error;

use crate::command::shell_result;

/// Compression algorithm for the final bundle, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Xz,
    Gzip,
    Bzip2,
    Zstd,
}

/// Error for unrecognized compression names.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown compression algorithm '{0}' (expected xz, gz, bz2 or zst)")]
pub struct UnknownCompression(String);

impl FromStr for Compression {
    type Err = UnknownCompression;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xz" => Ok(Self::Xz),
            "gz" | "gzip" => Ok(Self::Gzip),
            "bz2" | "bzip2" => Ok(Self::Bzip2),
            "zst" | "zstd" => Ok(Self::Zstd),
            other => Err(UnknownCompression(other.to_string())),
        }
    }
}

impl Compression {
    /// File extension `tar -a` keys its compressor from.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xz => "xz",
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::Zstd => "zst",
        }
    }
}

/// Remote path of the per-machine archive produced by the capture command.
pub fn remote_archive_path(dump_location: &str, uniq: &str) -> String {
    format!("{dump_location}/{uniq}/cluster-dump-{uniq}.tar")
}

/// Build the capture command run on every machine.
///
/// Files under the configured paths are selected with `find` honoring the
/// size ceiling, then archived relative to the staging directory so addon
/// and log output already placed there rides along (the trailing `.` path).
pub fn remote_capture_command(
    dump_location: &str,
    uniq: &str,
    paths: &[String],
    max_size: u64,
    excludes: &[String],
    as_root: bool,
) -> String {
    let sudo = if as_root { "sudo " } else { "" };
    let exclude_flags: String = excludes.iter().map(|pattern| format!(" --exclude {pattern}")).collect();
    format!(
        "mkdir -p {dump_location}/{uniq}/addon_output; \
         cd {dump_location}/{uniq}/addon_output; \
         {sudo}find {dirs} -mount -type f -size -{max_size}c -o -size {max_size}c 2>/dev/null | \
         {sudo}tar -pcf ../cluster-dump-{uniq}.tar{exclude_flags} --files-from - 2>/dev/null",
        dirs = paths.join(" "),
    )
}

/// Unpack a tar archive into `dest`, creating it first.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("failed to create {}", dest.display()))?;
    shell_result(&format!("tar -pxf {} -C {}", archive.display(), dest.display())).await
}

/// Package everything under `dir` into one compressed archive at `archive`.
///
/// The archive path must carry the compression extension; `tar -a` picks
/// the compressor from it.
pub async fn pack(dir: &Path, archive: &Path) -> Result<()> {
    if std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(true) {
        bail!("nothing to package under {}", dir.display());
    }
    shell_result(&format!("cd {} && tar -pacf {} * 2>/dev/null", dir.display(), archive.display())).await
}
