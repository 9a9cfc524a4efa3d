//! Archive adapter: exposes installable entries inside a (possibly remote)
//! archive as pull streams.
//!
//! Decoders read through a [`SourceReader`], so a remote zip or tar is
//! decoded with ranged reads (or one raw handle) and never downloaded
//! whole. The handle is not re-entrant: one entry is current at a time and
//! advancing invalidates its stream. Producers therefore take the handle by
//! value onto their own thread.

mod error;
mod tarball;
mod zip;

pub use error::ArchiveError;

use crate::source::{SharedSource, SourceReader};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Extension of installable package payloads (compared case-insensitively).
pub const INSTALLABLE_EXT: &str = ".pkg";
/// Raw container bytes pulled per decoder read.
pub const ARCHIVE_TRANSFER_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    Rar,
    SevenZip,
}

impl ArchiveFormat {
    /// Detects the format from a file name or URL path.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.split(['?', '#']).next().unwrap_or(name).to_ascii_lowercase();
        let format = if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Self::TarXz
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Self::TarBz2
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".rar") {
            Self::Rar
        } else if lower.ends_with(".7z") {
            Self::SevenZip
        } else {
            return None;
        };
        Some(format)
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Self::Zip | Self::Tar | Self::TarGz)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::TarBz2 => "tar.bz2",
            Self::Rar => "rar",
            Self::SevenZip => "7z",
        }
    }
}

/// True if `name` names a package payload.
pub fn is_installable_name(name: &str) -> bool {
    name.len() > INSTALLABLE_EXT.len()
        && name.is_char_boundary(name.len() - INSTALLABLE_EXT.len())
        && name[name.len() - INSTALLABLE_EXT.len()..].eq_ignore_ascii_case(INSTALLABLE_EXT)
}

/// Rejects absolute names and any name with a `..` segment.
pub fn is_safe_entry_name(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    if normalized.is_empty() || normalized.starts_with('/') {
        return false;
    }
    // Drive-letter paths such as `C:/x`.
    if normalized.as_bytes().get(1) == Some(&b':') {
        return false;
    }
    !normalized.split('/').any(|seg| seg == "..")
}

/// Entry as reported by a decoder, before filtering.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub name: String,
    pub size: u64,
    pub regular: bool,
}

pub(crate) enum ArchiveNext {
    Entry(RawEntry),
    End,
}

/// Pull interface every format decoder implements.
pub(crate) trait EntryDecoder: Send {
    /// Advances to the next entry, invalidating the current entry's stream.
    fn next_entry(&mut self) -> Result<ArchiveNext, ArchiveError>;
    /// Reads decoded bytes of the current entry; 0 at its end.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError>;
    /// Back to before the first entry.
    fn rewind(&mut self) -> Result<(), ArchiveError>;
}

/// An installable entry selected as current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

pub struct ArchiveHandle {
    path: String,
    format: ArchiveFormat,
    decoder: Box<dyn EntryDecoder>,
    current: Option<ArchiveEntry>,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("current", &self.current)
            .finish()
    }
}

impl ArchiveHandle {
    /// Opens the archive at `path` on `source`. The format comes from the
    /// path's extension.
    pub fn open(source: SharedSource, path: &str) -> Result<Self, ArchiveError> {
        let format = ArchiveFormat::from_name(path)
            .ok_or_else(|| ArchiveError::UnsupportedFormat(path.to_string()))?;
        if !format.is_supported() {
            return Err(ArchiveError::UnsupportedFormat(format.label().to_string()));
        }
        let reader = SourceReader::open(source, path, ARCHIVE_TRANSFER_SIZE)?;
        let decoder: Box<dyn EntryDecoder> = match format {
            ArchiveFormat::Zip => Box::new(zip::ZipDecoder::open(reader)?),
            ArchiveFormat::Tar => Box::new(tarball::TarDecoder::open(reader, false)?),
            ArchiveFormat::TarGz => Box::new(tarball::TarDecoder::open(reader, true)?),
            _ => return Err(ArchiveError::UnsupportedFormat(format.label().to_string())),
        };
        tracing::debug!(path, format = format.label(), "archive opened");
        Ok(Self {
            path: path.to_string(),
            format,
            decoder,
            current: None,
        })
    }

    /// Opens a local archive file.
    pub fn open_local(file: &Path) -> Result<Self, ArchiveError> {
        let dir = file.parent().unwrap_or(Path::new("."));
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiveError::UnsupportedFormat(file.display().to_string()))?;
        let source: SharedSource = Arc::new(crate::source::LocalSource::at(dir));
        Self::open(source, &name)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn current(&self) -> Option<&ArchiveEntry> {
        self.current.as_ref()
    }

    /// Restarts iteration and returns the first installable entry.
    pub fn first_installable_entry(&mut self) -> Result<Option<ArchiveEntry>, ArchiveError> {
        self.decoder.rewind()?;
        self.current = None;
        self.next_installable_entry()
    }

    /// Advances past the current entry to the next installable one, skipping
    /// directories, special files, other extensions and unsafe names.
    /// Returns None (and stays at the end) once the archive is exhausted.
    pub fn next_installable_entry(&mut self) -> Result<Option<ArchiveEntry>, ArchiveError> {
        self.current = None;
        loop {
            let raw = match self.decoder.next_entry()? {
                ArchiveNext::End => return Ok(None),
                ArchiveNext::Entry(raw) => raw,
            };
            if !raw.regular || !is_installable_name(&raw.name) {
                continue;
            }
            if !is_safe_entry_name(&raw.name) {
                tracing::warn!(archive = %self.path, entry = %raw.name, "skipping unsafe entry name");
                continue;
            }
            let entry = ArchiveEntry {
                name: raw.name,
                size: raw.size,
            };
            self.current = Some(entry.clone());
            return Ok(Some(entry));
        }
    }

    /// Reads decoded bytes of the current entry.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        if self.current.is_none() {
            return Err(ArchiveError::NoCurrentEntry);
        }
        self.decoder.read(buf)
    }

    /// Copies the rest of the current entry into `sink` in `chunk`-sized
    /// pieces, checking `stop` between pieces.
    pub fn copy_current_into(
        &mut self,
        sink: &mut dyn Write,
        stop: &AtomicBool,
        chunk: usize,
    ) -> Result<u64, ArchiveError> {
        let mut buf = vec![0u8; chunk.max(4096)];
        let mut total = 0u64;
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(ArchiveError::Stopped);
            }
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            sink.write_all(&buf[..n]).map_err(ArchiveError::Sink)?;
            total += n as u64;
        }
    }

    /// Names and sizes of all installable entries, leaving the handle
    /// positioned after the last one.
    pub fn installable_entries(&mut self) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut out = Vec::new();
        let mut next = self.first_installable_entry()?;
        while let Some(entry) = next {
            out.push(entry);
            next = self.next_installable_entry()?;
        }
        Ok(out)
    }
}
