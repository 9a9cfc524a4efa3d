//! Package metadata: just enough of the package container to find the
//! content id, declared size and the embedded parameter file (for the title)
//! and icon.
//!
//! All multi-byte header and table fields are big-endian.

pub mod sfo;

use crate::source::{RemoteSource, SourceError};
use crate::staging::{StagingBuffer, StagingError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic of installable packages.
pub const PKG_MAGIC: u32 = 0x7F43_4E54;
/// Magic of the newer package family; installable, but its entry table is
/// not parsed.
pub const PKG_MAGIC_V2: u32 = 0x7F46_4948;
pub const ENTRY_ID_PARAM_SFO: u32 = 0x1000;
pub const ENTRY_ID_ICON0_PNG: u32 = 0x1200;

/// Bytes read to parse the header.
pub const HEADER_LEN: usize = 0x80;
const ENTRY_LEN: usize = 32;
const CONTENT_ID_OFFSET: usize = 0x40;
const CONTENT_ID_LEN: usize = 36;
const MAX_TABLE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_ASSET_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("not a package (magic {0:#010x})")]
    BadMagic(u32),
    #[error("package truncated at offset {offset}")]
    Truncated { offset: u64 },
    #[error("malformed package: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Positioned byte access to a package, wherever it lives.
pub trait PackageBytes {
    /// Fills `buf` from `offset` or fails with [`PackageError::Truncated`].
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), PackageError>;
}

/// A package object on a remote source.
pub struct RemoteObject<'a> {
    pub source: &'a dyn RemoteSource,
    pub path: &'a str,
}

impl PackageBytes for RemoteObject<'_> {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), PackageError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self
                .source
                .read_range(self.path, &mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(PackageError::Truncated { offset: offset + done as u64 });
            }
            done += n;
        }
        Ok(())
    }
}

/// Blocks until the producer has written the requested bytes.
impl PackageBytes for StagingBuffer {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), PackageError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(PackageError::Truncated { offset: offset + done as u64 });
            }
            done += n;
        }
        Ok(())
    }
}

impl PackageBytes for [u8] {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), PackageError> {
        let start = usize::try_from(offset).map_err(|_| PackageError::Truncated { offset })?;
        let src = self
            .get(start..start + buf.len())
            .ok_or(PackageError::Truncated { offset })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn be_u64(data: &[u8], at: usize) -> u64 {
    (u64::from(be_u32(data, at)) << 32) | u64::from(be_u32(data, at + 4))
}

/// Fixed-position header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub magic: u32,
    pub entry_count: u32,
    pub table_offset: u32,
    pub content_size: u64,
    pub content_id: String,
}

impl PackageHeader {
    pub fn parse(data: &[u8]) -> Result<Self, PackageError> {
        if data.len() < HEADER_LEN {
            return Err(PackageError::Truncated { offset: data.len() as u64 });
        }
        let magic = be_u32(data, 0);
        if magic != PKG_MAGIC && magic != PKG_MAGIC_V2 {
            return Err(PackageError::BadMagic(magic));
        }
        let raw_id = &data[CONTENT_ID_OFFSET..CONTENT_ID_OFFSET + CONTENT_ID_LEN];
        let end = raw_id.iter().position(|&b| b == 0).unwrap_or(raw_id.len());
        Ok(Self {
            magic,
            entry_count: be_u32(data, 0x10),
            table_offset: be_u32(data, 0x18),
            content_size: be_u64(data, 0x38),
            content_id: String::from_utf8_lossy(&raw_id[..end]).into_owned(),
        })
    }

    pub fn read_from(bytes: &(impl PackageBytes + ?Sized)) -> Result<Self, PackageError> {
        let mut buf = [0u8; HEADER_LEN];
        bytes.read_exact_at(&mut buf, 0)?;
        Self::parse(&buf)
    }

    /// True if the entry table layout is known for this package family.
    pub fn has_entry_table(&self) -> bool {
        self.magic == PKG_MAGIC
    }
}

/// One entry-table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub id: u32,
    pub offset: u32,
    pub size: u32,
}

fn read_table(
    bytes: &(impl PackageBytes + ?Sized),
    header: &PackageHeader,
) -> Result<Vec<TableEntry>, PackageError> {
    let table_len = u64::from(header.entry_count) * ENTRY_LEN as u64;
    if table_len > MAX_TABLE_BYTES {
        return Err(PackageError::Malformed("entry table too large"));
    }
    let mut raw = vec![0u8; table_len as usize];
    bytes.read_exact_at(&mut raw, u64::from(header.table_offset))?;
    Ok(raw
        .chunks_exact(ENTRY_LEN)
        .map(|e| TableEntry {
            id: be_u32(e, 0),
            offset: be_u32(e, 16),
            size: be_u32(e, 20),
        })
        .collect())
}

fn read_entry(
    bytes: &(impl PackageBytes + ?Sized),
    entry: &TableEntry,
) -> Result<Vec<u8>, PackageError> {
    if entry.size > MAX_ASSET_BYTES {
        return Err(PackageError::Malformed("embedded entry too large"));
    }
    let mut data = vec![0u8; entry.size as usize];
    bytes.read_exact_at(&mut data, u64::from(entry.offset))?;
    Ok(data)
}

/// Nine characters after the first `-` of a content id
/// (`UP0000-CUSA00000_00-...` gives `CUSA00000`).
pub fn short_title_id(content_id: &str) -> String {
    let rest = match content_id.find('-') {
        Some(i) => &content_id[i + 1..],
        None => content_id,
    };
    rest.chars().take(9).collect()
}

/// What the installer needs to label and track an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub content_id: String,
    pub title: Option<String>,
    pub content_size: u64,
}

impl PackageMetadata {
    /// Title from the parameter file, else the short id from the content id.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(t) if !t.is_empty() => t.clone(),
            _ => short_title_id(&self.content_id),
        }
    }
}

/// Reads header and, when the table layout is known, the `TITLE` value of
/// the embedded parameter file. A missing parameter file is not an error.
pub fn read_metadata(bytes: &(impl PackageBytes + ?Sized)) -> Result<PackageMetadata, PackageError> {
    let header = PackageHeader::read_from(bytes)?;
    let mut title = None;
    if header.has_entry_table() {
        let table = read_table(bytes, &header)?;
        if let Some(entry) = table.iter().find(|e| e.id == ENTRY_ID_PARAM_SFO) {
            if entry.offset > 0 && entry.size > 0 {
                let sfo_data = read_entry(bytes, entry)?;
                title = sfo::get_string(&sfo_data, "TITLE");
            }
        }
    }
    Ok(PackageMetadata {
        content_id: header.content_id,
        title,
        content_size: header.content_size,
    })
}

/// Files written by [`extract_assets`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedAssets {
    pub param_sfo: Option<PathBuf>,
    pub icon0: Option<PathBuf>,
}

/// Writes the embedded `param.sfo` and `icon0.png` into `dir`.
pub fn extract_assets(
    bytes: &(impl PackageBytes + ?Sized),
    dir: &Path,
) -> Result<ExtractedAssets, PackageError> {
    let header = PackageHeader::read_from(bytes)?;
    let mut out = ExtractedAssets::default();
    if !header.has_entry_table() {
        return Ok(out);
    }
    fs::create_dir_all(dir)?;
    for entry in read_table(bytes, &header)? {
        if entry.offset == 0 || entry.size == 0 {
            continue;
        }
        let (slot, name) = match entry.id {
            ENTRY_ID_PARAM_SFO => (&mut out.param_sfo, "param.sfo"),
            ENTRY_ID_ICON0_PNG => (&mut out.icon0, "icon0.png"),
            _ => continue,
        };
        if slot.is_some() {
            continue;
        }
        let path = dir.join(name);
        fs::write(&path, read_entry(bytes, &entry)?)?;
        *slot = Some(path);
        if out.param_sfo.is_some() && out.icon0.is_some() {
            break;
        }
    }
    Ok(out)
}
