//! Errors surfaced by remote source adapters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source is not connected")]
    NotConnected,
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0}")]
    Curl(#[from] curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("not found: {0}")]
    NotFound(String),
    /// The remote sent fewer bytes than the requested range.
    #[error("short read: expected {expected} bytes, got {received}")]
    ShortRead { expected: u64, received: u64 },
    /// The sink refused more data (buffer closed or consumer went away).
    #[error("sink closed")]
    SinkClosed,
    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Connectivity failures are reported before any job exists.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SourceError::NotConnected | SourceError::InvalidUrl { .. } => true,
            SourceError::Curl(e) => {
                e.is_couldnt_connect()
                    || e.is_couldnt_resolve_host()
                    || e.is_login_denied()
                    || e.is_operation_timedout()
            }
            SourceError::Http(code) => matches!(code, 401 | 403 | 404),
            SourceError::NotFound(_) => true,
            _ => false,
        }
    }
}
