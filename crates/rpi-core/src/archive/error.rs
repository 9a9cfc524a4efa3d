use crate::source::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("unsupported entry {name}: {reason}")]
    UnsupportedEntry { name: String, reason: &'static str },
    #[error("no current entry")]
    NoCurrentEntry,
    #[error("extraction stopped")]
    Stopped,
    #[error("sink refused data: {0}")]
    Sink(std::io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("archive io: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ArchiveError::Corrupt(msg.into())
    }
}
