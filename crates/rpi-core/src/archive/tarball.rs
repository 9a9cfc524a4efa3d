//! Streaming tar (and gzip-compressed tar) decoding.
//!
//! Headers are parsed with `tar::Header`; the stream itself is walked by
//! hand so entry payloads can be pulled in caller-sized pieces instead of
//! through the `tar::Archive` iterator borrow.

use super::{ArchiveError, ArchiveNext, EntryDecoder, RawEntry};
use crate::source::SourceReader;
use flate2::read::MultiGzDecoder;
use std::io::{self, Read};
use tar::{EntryType, Header};

const BLOCK: u64 = 512;
const MAX_META_BYTES: u64 = 1024 * 1024;

pub(super) struct TarDecoder {
    template: SourceReader,
    gzip: bool,
    stream: Box<dyn Read + Send>,
    /// Unread payload bytes of the current entry.
    remaining: u64,
    /// Padding after the current entry's payload.
    pad: u64,
    at_entry: bool,
    finished: bool,
}

fn open_stream(template: &SourceReader, gzip: bool) -> Result<Box<dyn Read + Send>, ArchiveError> {
    let reader = template.reopen()?;
    Ok(if gzip {
        Box::new(MultiGzDecoder::new(reader))
    } else {
        Box::new(reader)
    })
}

fn padding(size: u64) -> u64 {
    (BLOCK - size % BLOCK) % BLOCK
}

fn trim_nul(mut data: Vec<u8>) -> Vec<u8> {
    if let Some(end) = data.iter().position(|&b| b == 0) {
        data.truncate(end);
    }
    data
}

/// `path` record of a pax extended header (`"<len> path=<value>\n"`).
fn pax_path(data: &[u8]) -> Option<Vec<u8>> {
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let len: usize = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
        if len <= space || len > rest.len() {
            return None;
        }
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(value) = record.strip_prefix(b"path=") {
            return Some(value.to_vec());
        }
        rest = &rest[len..];
    }
    None
}

impl TarDecoder {
    pub(super) fn open(template: SourceReader, gzip: bool) -> Result<Self, ArchiveError> {
        let stream = open_stream(&template, gzip)?;
        Ok(Self {
            template,
            gzip,
            stream,
            remaining: 0,
            pad: 0,
            at_entry: false,
            finished: false,
        })
    }

    fn skip(&mut self, n: u64) -> Result<(), ArchiveError> {
        if n == 0 {
            return Ok(());
        }
        let copied = io::copy(&mut (&mut self.stream).take(n), &mut io::sink())?;
        if copied != n {
            return Err(ArchiveError::corrupt("tar stream truncated"));
        }
        Ok(())
    }

    /// Reads one 512-byte block. Returns false on a clean end of stream.
    fn read_block(&mut self, block: &mut [u8; 512]) -> Result<bool, ArchiveError> {
        let mut filled = 0;
        while filled < block.len() {
            match self.stream.read(&mut block[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(ArchiveError::corrupt("partial tar header")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn read_meta(&mut self, size: u64) -> Result<Vec<u8>, ArchiveError> {
        if size > MAX_META_BYTES {
            return Err(ArchiveError::corrupt("oversized tar metadata entry"));
        }
        let mut data = vec![0u8; size as usize];
        self.stream.read_exact(&mut data).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ArchiveError::corrupt("tar stream truncated"),
            _ => ArchiveError::Io(e),
        })?;
        self.skip(padding(size))?;
        Ok(data)
    }
}

impl EntryDecoder for TarDecoder {
    fn next_entry(&mut self) -> Result<ArchiveNext, ArchiveError> {
        if self.finished {
            return Ok(ArchiveNext::End);
        }
        let leftover = self.remaining + self.pad;
        self.remaining = 0;
        self.pad = 0;
        self.at_entry = false;
        self.skip(leftover)?;

        let mut long_name: Option<Vec<u8>> = None;
        loop {
            let mut block = [0u8; 512];
            if !self.read_block(&mut block)? || block.iter().all(|&b| b == 0) {
                self.finished = true;
                return Ok(ArchiveNext::End);
            }
            let header = Header::from_byte_slice(&block);
            let size = header.entry_size()?;
            match header.entry_type() {
                EntryType::GNULongName => {
                    long_name = Some(trim_nul(self.read_meta(size)?));
                }
                EntryType::XHeader => {
                    let data = self.read_meta(size)?;
                    if let Some(path) = pax_path(&data) {
                        long_name = Some(path);
                    }
                }
                EntryType::XGlobalHeader | EntryType::GNULongLink => {
                    self.read_meta(size)?;
                }
                kind => {
                    let name = match long_name.take() {
                        Some(n) => n,
                        None => header.path_bytes().into_owned(),
                    };
                    self.remaining = size;
                    self.pad = padding(size);
                    self.at_entry = true;
                    return Ok(ArchiveNext::Entry(RawEntry {
                        name: String::from_utf8_lossy(&name).into_owned(),
                        size,
                        regular: kind.is_file(),
                    }));
                }
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        if !self.at_entry {
            return Err(ArchiveError::NoCurrentEntry);
        }
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ArchiveError::corrupt("tar entry truncated"));
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    fn rewind(&mut self) -> Result<(), ArchiveError> {
        self.stream = open_stream(&self.template, self.gzip)?;
        self.remaining = 0;
        self.pad = 0;
        self.at_entry = false;
        self.finished = false;
        Ok(())
    }
}
