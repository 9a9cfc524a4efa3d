use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging io: {0}")]
    Io(#[from] std::io::Error),
    /// Write attempted after `close`.
    #[error("staging buffer is closed")]
    Closed,
    /// The error flag was set by a failed write or a failed producer.
    #[error("staging failed: {0}")]
    Failed(String),
}
