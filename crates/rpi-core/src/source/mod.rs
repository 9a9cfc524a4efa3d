//! Protocol-agnostic remote source contract.
//!
//! Every protocol adapter (HTTP, local disk, and whatever else the browser
//! connects to) implements [`RemoteSource`]. Callers never inspect the
//! concrete type: they check [`Actions`] and branch on `Result`s. Each adapter
//! also keeps a human-readable last-response string for status lines.

mod actions;
mod error;
mod http;
mod local;
mod reader;

pub use actions::Actions;
pub use error::SourceError;
pub use http::{HttpConnector, HttpSource};
pub use local::{LocalConnector, LocalSource};
pub use reader::SourceReader;

use std::io::Write;
use std::sync::Arc;

/// Opaque handle returned by [`RemoteSource::open_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

/// Capability-described interface any protocol adapter implements.
///
/// `connect` takes `&mut self` so a source is configured before it is shared;
/// everything else is `&self` and must be safe to call from the bridge and a
/// producer thread at once.
pub trait RemoteSource: Send + Sync {
    fn connect(&mut self, url: &str, username: &str, password: &str) -> Result<(), SourceError>;

    /// Total size of the object at `path`.
    fn size(&self, path: &str) -> Result<u64, SourceError>;

    fn exists(&self, path: &str) -> bool;

    /// Reads up to `buf.len()` bytes at `offset` into `buf`. Returns the
    /// number of bytes read (short only at end of object).
    fn read_range(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, SourceError>;

    /// Streams `size` bytes at `offset` into `sink`. Returns bytes delivered.
    fn read_range_into(
        &self,
        path: &str,
        sink: &mut dyn Write,
        size: u64,
        offset: u64,
    ) -> Result<u64, SourceError>;

    /// Streams the whole object into `sink` with a single sequential read.
    fn get_into(&self, path: &str, sink: &mut dyn Write) -> Result<u64, SourceError>;

    /// Opens a handle for repeated ranged reads. Only meaningful when
    /// [`Actions::RAW_READ`] is advertised.
    fn open_raw(&self, _path: &str) -> Result<RawHandle, SourceError> {
        Err(SourceError::Unsupported("raw read"))
    }

    fn read_raw(&self, _handle: RawHandle, _buf: &mut [u8], _offset: u64) -> Result<usize, SourceError> {
        Err(SourceError::Unsupported("raw read"))
    }

    fn close_raw(&self, _handle: RawHandle) {}

    fn disconnect(&self);

    fn actions(&self) -> Actions;

    /// Last response or error text, for user-visible status.
    fn last_response(&self) -> String;
}

/// Produces freshly connected sources. Direct-remote jobs use one connection
/// per bridge request and drop it when the response completes.
pub trait SourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn RemoteSource>, SourceError>;

    /// Human-readable origin (host or root dir) for logs.
    fn describe(&self) -> String;
}

impl<F> SourceFactory for F
where
    F: Fn() -> Result<Box<dyn RemoteSource>, SourceError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn RemoteSource>, SourceError> {
        self()
    }

    fn describe(&self) -> String {
        "custom source".to_string()
    }
}

/// A connected source shared between the orchestrator, a producer thread and
/// the bridge.
pub type SharedSource = Arc<dyn RemoteSource>;

/// Splits `scheme://host[:port]/path?query` into the connect URL and the path
/// handed to source operations. Paths default to `/`.
pub fn split_url(raw: &str) -> Result<(String, String), SourceError> {
    let parsed = url::Url::parse(raw).map_err(|e| SourceError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| SourceError::InvalidUrl {
        url: raw.to_string(),
        reason: "missing host".to_string(),
    })?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    let mut path = parsed.path().to_string();
    if let Some(q) = parsed.query() {
        path.push('?');
        path.push_str(q);
    }
    Ok((origin, path))
}

/// Writes into a caller-owned slice, refusing anything past its end.
pub(crate) struct SliceSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceSink<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn filled(&self) -> usize {
        self.pos
    }
}

impl Write for SliceSink<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let room = self.buf.len() - self.pos;
        let n = room.min(data.len());
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
