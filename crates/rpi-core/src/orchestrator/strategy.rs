//! Picking DIRECT, STAGED or ARCHIVE for a resolved source.

use super::InstallError;
use crate::archive::{is_installable_name, ArchiveError, ArchiveFormat};
use crate::jobs::JobKind;
use crate::package::{PKG_MAGIC, PKG_MAGIC_V2};
use crate::source::{Actions, RemoteSource};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Bridge reads pass through to the remote source.
    Direct,
    /// A producer copies the object into a staging buffer first.
    Staged,
    /// A producer decodes archive entries into staging buffers.
    Archive,
}

impl Strategy {
    pub fn job_kind(self) -> JobKind {
        match self {
            Strategy::Direct => JobKind::Direct,
            Strategy::Staged => JobKind::Staged,
            Strategy::Archive => JobKind::Archive,
        }
    }
}

/// What the bytes at a path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Package,
    Archive(ArchiveFormat),
    Unknown,
}

/// Reads the first four bytes when the source supports ranged reads and
/// checks for a package magic; otherwise (or when the magic does not
/// match) falls back to the file name.
pub fn sniff(source: &dyn RemoteSource, path: &str, size: u64) -> ContentKind {
    if source.actions().contains(Actions::RANGED_READ) && size >= 4 {
        let mut magic = [0u8; 4];
        match source.read_range(path, &mut magic, 0) {
            Ok(4) => {
                let magic = u32::from_be_bytes(magic);
                if magic == PKG_MAGIC || magic == PKG_MAGIC_V2 {
                    return ContentKind::Package;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(path, "magic sniff failed: {}", e),
        }
    } else if is_installable_name(path) {
        return ContentKind::Package;
    }
    match ArchiveFormat::from_name(path) {
        Some(format) => ContentKind::Archive(format),
        None => ContentKind::Unknown,
    }
}

/// Packages go DIRECT unless disk caching is requested or the source
/// cannot serve ranges; archives always go through ARCHIVE.
pub fn select_strategy(
    content: ContentKind,
    use_disk_cache: bool,
    actions: Actions,
) -> Result<Strategy, InstallError> {
    match content {
        ContentKind::Package if use_disk_cache || !actions.contains(Actions::RANGED_READ) => {
            Ok(Strategy::Staged)
        }
        ContentKind::Package => Ok(Strategy::Direct),
        ContentKind::Archive(format) if format.is_supported() => Ok(Strategy::Archive),
        ContentKind::Archive(format) => Err(InstallError::Archive(
            ArchiveError::UnsupportedFormat(format.label().to_string()),
        )),
        ContentKind::Unknown => Err(InstallError::NotInstallable(
            "neither a package nor a supported archive".to_string(),
        )),
    }
}
