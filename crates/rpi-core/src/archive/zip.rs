//! Zip decoding over a [`SourceReader`].
//!
//! The central directory is read once from the end of the object (zip64
//! records included); entry data is opened lazily at the local header, so
//! listing a remote archive costs two ranged reads. Stored and deflate
//! entries are supported.

use super::{ArchiveError, ArchiveNext, EntryDecoder, RawEntry};
use crate::source::SourceReader;
use flate2::read::DeflateDecoder;
use std::io::{Read, Seek, SeekFrom};

const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const CDFH_SIG: u32 = 0x0201_4b50;
const CDFH_LEN: usize = 46;
const LFH_SIG: u32 = 0x0403_4b50;
const LFH_LEN: usize = 30;
const MAX_COMMENT: u64 = 0xFFFF;
const MAX_CD_BYTES: u64 = 64 * 1024 * 1024;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const FLAG_ENCRYPTED: u16 = 0x0001;
const HOST_UNIX: u16 = 3;
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const DOS_DIR_ATTR: u32 = 0x10;

fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le64(b: &[u8], at: usize) -> u64 {
    u64::from(le32(b, at)) | (u64::from(le32(b, at + 4)) << 32)
}

fn read_exact_at(reader: &SourceReader, buf: &mut [u8], offset: u64) -> Result<(), ArchiveError> {
    let mut done = 0;
    while done < buf.len() {
        let n = reader.read_at(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            return Err(ArchiveError::corrupt(format!(
                "unexpected end of object at {}",
                offset + done as u64
            )));
        }
        done += n;
    }
    Ok(())
}

/// Central directory record, sizes already widened from zip64 extras.
#[derive(Debug, Clone)]
struct CdEntry {
    name: String,
    method: u16,
    flags: u16,
    compressed: u64,
    uncompressed: u64,
    local_offset: u64,
    regular: bool,
}

struct Directory {
    entries: u64,
    size: u64,
    offset: u64,
}

fn locate_directory(reader: &SourceReader) -> Result<Directory, ArchiveError> {
    let size = reader.size();
    if size < EOCD_LEN as u64 {
        return Err(ArchiveError::corrupt("too small for a zip"));
    }
    let tail_len = size.min(EOCD_LEN as u64 + MAX_COMMENT);
    let tail_start = size - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    read_exact_at(reader, &mut tail, tail_start)?;

    let eocd_at = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&i| le32(&tail, i) == EOCD_SIG)
        .ok_or_else(|| ArchiveError::corrupt("end of central directory not found"))?;
    let eocd = &tail[eocd_at..];
    let mut dir = Directory {
        entries: u64::from(le16(eocd, 10)),
        size: u64::from(le32(eocd, 12)),
        offset: u64::from(le32(eocd, 16)),
    };

    let eocd_abs = tail_start + eocd_at as u64;
    let needs_zip64 =
        dir.entries == 0xFFFF || dir.size == 0xFFFF_FFFF || dir.offset == 0xFFFF_FFFF;
    if needs_zip64 && eocd_abs >= ZIP64_LOCATOR_LEN {
        let mut locator = [0u8; ZIP64_LOCATOR_LEN as usize];
        read_exact_at(reader, &mut locator, eocd_abs - ZIP64_LOCATOR_LEN)?;
        if le32(&locator, 0) == ZIP64_LOCATOR_SIG {
            let mut record = [0u8; 56];
            read_exact_at(reader, &mut record, le64(&locator, 8))?;
            if le32(&record, 0) != ZIP64_EOCD_SIG {
                return Err(ArchiveError::corrupt("bad zip64 end record"));
            }
            dir = Directory {
                entries: le64(&record, 32),
                size: le64(&record, 40),
                offset: le64(&record, 48),
            };
        }
    }
    if dir.size > MAX_CD_BYTES || dir.offset.saturating_add(dir.size) > size {
        return Err(ArchiveError::corrupt("central directory out of bounds"));
    }
    Ok(dir)
}

fn apply_zip64_extra(entry: &mut CdEntry, mut extra: &[u8]) {
    while extra.len() >= 4 {
        let id = le16(extra, 0);
        let len = le16(extra, 2) as usize;
        let Some(body) = extra.get(4..4 + len) else {
            return;
        };
        if id == 0x0001 {
            let mut at = 0;
            let mut take = |field: &mut u64| {
                if *field == 0xFFFF_FFFF && at + 8 <= body.len() {
                    *field = le64(body, at);
                    at += 8;
                }
            };
            take(&mut entry.uncompressed);
            take(&mut entry.compressed);
            take(&mut entry.local_offset);
            return;
        }
        extra = &extra[4 + len..];
    }
}

fn parse_directory(data: &[u8], expected: u64) -> Result<Vec<CdEntry>, ArchiveError> {
    let mut entries = Vec::with_capacity(expected.min(65_536) as usize);
    let mut at = 0;
    while at + CDFH_LEN <= data.len() && le32(data, at) == CDFH_SIG {
        let h = &data[at..];
        let made_by = le16(h, 4);
        let name_len = le16(h, 28) as usize;
        let extra_len = le16(h, 30) as usize;
        let comment_len = le16(h, 32) as usize;
        let ext_attr = le32(h, 38);
        let end = CDFH_LEN + name_len + extra_len + comment_len;
        if h.len() < end {
            return Err(ArchiveError::corrupt("central directory entry truncated"));
        }
        let name = String::from_utf8_lossy(&h[CDFH_LEN..CDFH_LEN + name_len]).into_owned();
        let is_dir = name.ends_with('/')
            || (made_by >> 8 != HOST_UNIX && ext_attr & DOS_DIR_ATTR != 0);
        let mode = ext_attr >> 16;
        let unix_special = made_by >> 8 == HOST_UNIX && mode & S_IFMT != 0 && mode & S_IFMT != S_IFREG;
        let mut entry = CdEntry {
            name,
            method: le16(h, 10),
            flags: le16(h, 8),
            compressed: u64::from(le32(h, 20)),
            uncompressed: u64::from(le32(h, 24)),
            local_offset: u64::from(le32(h, 42)),
            regular: !is_dir && !unix_special,
        };
        apply_zip64_extra(
            &mut entry,
            &h[CDFH_LEN + name_len..CDFH_LEN + name_len + extra_len],
        );
        entries.push(entry);
        at += end;
    }
    if (entries.len() as u64) < expected {
        return Err(ArchiveError::corrupt(format!(
            "central directory lists {} entries, found {}",
            expected,
            entries.len()
        )));
    }
    Ok(entries)
}

pub(super) struct ZipDecoder {
    reader: SourceReader,
    entries: Vec<CdEntry>,
    /// Index of the current entry; None before the first `next_entry`.
    cursor: Option<usize>,
    stream: Option<Box<dyn Read + Send>>,
}

impl ZipDecoder {
    pub(super) fn open(reader: SourceReader) -> Result<Self, ArchiveError> {
        let dir = locate_directory(&reader)?;
        let mut raw = vec![0u8; dir.size as usize];
        read_exact_at(&reader, &mut raw, dir.offset)?;
        let entries = parse_directory(&raw, dir.entries)?;
        tracing::debug!(path = reader.path(), entries = entries.len(), "zip directory read");
        Ok(Self {
            reader,
            entries,
            cursor: None,
            stream: None,
        })
    }

    fn open_stream(&self, entry: &CdEntry) -> Result<Box<dyn Read + Send>, ArchiveError> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::UnsupportedEntry {
                name: entry.name.clone(),
                reason: "encrypted",
            });
        }
        let mut lfh = [0u8; LFH_LEN];
        read_exact_at(&self.reader, &mut lfh, entry.local_offset)?;
        if le32(&lfh, 0) != LFH_SIG {
            return Err(ArchiveError::corrupt(format!("bad local header for {}", entry.name)));
        }
        let data_start = entry.local_offset
            + LFH_LEN as u64
            + u64::from(le16(&lfh, 26))
            + u64::from(le16(&lfh, 28));
        let mut reader = self.reader.reopen()?;
        reader.seek(SeekFrom::Start(data_start))?;
        let limited = reader.take(entry.compressed);
        match entry.method {
            METHOD_STORED => Ok(Box::new(limited)),
            METHOD_DEFLATE => Ok(Box::new(DeflateDecoder::new(limited))),
            _ => Err(ArchiveError::UnsupportedEntry {
                name: entry.name.clone(),
                reason: "compression method",
            }),
        }
    }
}

impl EntryDecoder for ZipDecoder {
    fn next_entry(&mut self) -> Result<ArchiveNext, ArchiveError> {
        self.stream = None;
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next);
        Ok(match self.entries.get(next) {
            Some(e) => ArchiveNext::Entry(RawEntry {
                name: e.name.clone(),
                size: e.uncompressed,
                regular: e.regular,
            }),
            None => ArchiveNext::End,
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        let entry = self
            .cursor
            .and_then(|i| self.entries.get(i))
            .ok_or(ArchiveError::NoCurrentEntry)?;
        if self.stream.is_none() {
            self.stream = Some(self.open_stream(entry)?);
        }
        match self.stream.as_mut() {
            Some(stream) => Ok(stream.read(buf)?),
            None => Err(ArchiveError::NoCurrentEntry),
        }
    }

    fn rewind(&mut self) -> Result<(), ArchiveError> {
        self.cursor = None;
        self.stream = None;
        Ok(())
    }
}
