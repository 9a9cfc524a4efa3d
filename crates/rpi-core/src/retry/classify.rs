//! Maps source errors onto retry failures.

use super::policy::Failure;
use crate::source::SourceError;
use std::io;

/// curl conditions after which the same request may succeed.
const DROPPED: &[fn(&curl::Error) -> bool] = &[
    curl::Error::is_couldnt_connect,
    curl::Error::is_couldnt_resolve_host,
    curl::Error::is_recv_error,
    curl::Error::is_send_error,
    curl::Error::is_read_error,
    curl::Error::is_got_nothing,
    curl::Error::is_partial_file,
];

pub fn classify_status(code: u32) -> Failure {
    match code {
        429 | 503 => Failure::Overloaded,
        500..=599 => Failure::ServerError(code as u16),
        _ => Failure::Permanent,
    }
}

fn classify_curl(e: &curl::Error) -> Failure {
    if e.is_operation_timedout() {
        Failure::TimedOut
    } else if DROPPED.iter().any(|check| check(e)) {
        Failure::Dropped
    } else {
        Failure::Permanent
    }
}

/// A disconnected source is never retried, so cancellation stays prompt.
pub fn classify(e: &SourceError) -> Failure {
    match e {
        SourceError::Curl(ce) => classify_curl(ce),
        SourceError::Http(code) => classify_status(*code),
        SourceError::ShortRead { .. } => Failure::Dropped,
        SourceError::Io(io) => match io.kind() {
            io::ErrorKind::TimedOut => Failure::TimedOut,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Failure::Dropped,
            _ => Failure::Permanent,
        },
        _ => Failure::Permanent,
    }
}
