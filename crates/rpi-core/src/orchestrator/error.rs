use crate::archive::ArchiveError;
use crate::installer::InstallerError;
use crate::jobs::ActivityBusy;
use crate::package::PackageError;
use crate::source::SourceError;
use crate::staging::StagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Busy(#[from] ActivityBusy),
    /// The source could not be reached or sized; nothing was registered.
    #[error("cannot reach source: {0}")]
    Connect(#[source] SourceError),
    #[error("not installable: {0}")]
    NotInstallable(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("cannot read package metadata: {0}")]
    Metadata(#[from] PackageError),
    /// The producer or a staging write failed mid-stream.
    #[error("stream failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("installer refused the package: {0}")]
    Registration(#[source] InstallerError),
    #[error("installer query failed: {0}")]
    Poll(#[source] InstallerError),
    /// The installer reported a non-zero error code.
    #[error("installer failed with error {code:#010x}")]
    Installer { code: u32 },
    #[error("install canceled")]
    Canceled,
}

impl InstallError {
    /// One user-facing line per failure category.
    pub fn status_message(&self) -> &'static str {
        match self {
            InstallError::Busy(_) => "Another install is already in progress",
            InstallError::Connect(_) => "Cannot connect to the remote source",
            InstallError::NotInstallable(_) | InstallError::Archive(_) => {
                "The selected item cannot be installed"
            }
            InstallError::Metadata(PackageError::Source(_) | PackageError::Staging(_))
            | InstallError::Stream(_)
            | InstallError::Staging(_) => "Transfer failed while streaming the package",
            InstallError::Metadata(_) => "The package header is invalid",
            InstallError::Registration(_) => "The installer refused the package",
            InstallError::Poll(_) | InstallError::Installer { .. } => "The installer reported an error",
            InstallError::Canceled => "Install canceled",
        }
    }
}
