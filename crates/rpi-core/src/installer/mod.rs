//! The external package installer, seen from the outside: accept a URL,
//! then report progress when polled by content id.
//!
//! The device's own engine is opaque and sits behind [`PackageInstaller`].
//! [`MirrorInstaller`] is a development stand-in that pulls the URL with
//! byte-range GETs into a local directory.

mod mirror;
mod output;
mod segments;

pub use mirror::MirrorInstaller;
pub use output::{temp_path, OutputFile, TEMP_SUFFIX};
pub use segments::{plan_segments, Segment};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    /// The installer refused the submission.
    #[error("installer rejected {uri}: {reason}")]
    Rejected { uri: String, reason: String },
    /// The installer could not be queried.
    #[error("installer unavailable: {0}")]
    Unavailable(String),
    #[error("installer io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    /// Nothing known under this content id.
    None,
    Running,
    Playable,
    Error,
}

impl InstallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InstallStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstallProgress {
    pub status: InstallStatus,
    /// Non-zero means the install failed.
    pub error_code: u32,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
}

impl InstallProgress {
    pub fn none() -> Self {
        Self {
            status: InstallStatus::None,
            error_code: 0,
            bytes_total: 0,
            bytes_transferred: 0,
        }
    }
}

pub trait PackageInstaller: Send + Sync {
    /// Hands `uri` to the installer. Returns once it is accepted or refused;
    /// the transfer itself runs asynchronously.
    fn submit(&self, uri: &str, display_name: &str) -> Result<(), InstallerError>;

    fn poll(&self, content_id: &str) -> Result<InstallProgress, InstallerError>;
}
