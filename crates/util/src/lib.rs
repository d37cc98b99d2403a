//! Utility layer for the clusterdump collector: local command execution,
//! the SSH transport seam, archive plumbing, and the capture-path list.

pub mod archive;
pub mod command;
pub mod paths;
pub mod transport;

pub use archive::{Compression, UnknownCompression, pack, remote_archive_path, remote_capture_command, unpack};
pub use command::{shell_ok, shell_ok_in, shell_quote, shell_result, shell_to_file, stage_ssh_key};
pub use paths::{CapturePaths, DEFAULT_MAX_FILE_SIZE};
pub use transport::{SshTransport, Transport};
