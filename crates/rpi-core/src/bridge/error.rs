use crate::source::SourceError;
use crate::staging::StagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("job stopped")]
    Stopped,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("bridge io: {0}")]
    Io(#[from] std::io::Error),
}
