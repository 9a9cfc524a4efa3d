//! `Read + Seek` view of an object on a remote source.
//!
//! Archive decoders pull through this. When the source advertises
//! [`Actions::RAW_READ`] a single raw handle serves every read; otherwise each
//! refill is an independent ranged read against the path. Reads are buffered
//! in `block`-sized pulls.

use super::{Actions, RawHandle, RemoteSource, SourceError};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

pub struct SourceReader {
    source: Arc<dyn RemoteSource>,
    path: String,
    raw: Option<RawHandle>,
    size: u64,
    pos: u64,
    block: usize,
    buf: Vec<u8>,
    /// Source offset of `buf[0]`.
    buf_start: u64,
}

impl SourceReader {
    pub fn open(
        source: Arc<dyn RemoteSource>,
        path: &str,
        block: usize,
    ) -> Result<Self, SourceError> {
        let size = source.size(path)?;
        let raw = if source.actions().contains(Actions::RAW_READ) {
            Some(source.open_raw(path)?)
        } else {
            None
        };
        Ok(Self {
            source,
            path: path.to_string(),
            raw,
            size,
            pos: 0,
            block: block.max(4096),
            buf: Vec::new(),
            buf_start: 0,
        })
    }

    /// Second reader on the same object, positioned at 0. Skips the size
    /// query; takes its own raw handle when the source supports them.
    pub fn reopen(&self) -> Result<Self, SourceError> {
        let raw = match self.raw {
            Some(_) => Some(self.source.open_raw(&self.path)?),
            None => None,
        };
        Ok(Self {
            source: Arc::clone(&self.source),
            path: self.path.clone(),
            raw,
            size: self.size,
            pos: 0,
            block: self.block,
            buf: Vec::new(),
            buf_start: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Positioned read that bypasses the internal buffer.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        if offset >= self.size {
            return Ok(0);
        }
        let len = ((self.size - offset) as usize).min(buf.len());
        match self.raw {
            Some(h) => self.source.read_raw(h, &mut buf[..len], offset),
            None => self.source.read_range(&self.path, &mut buf[..len], offset),
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let want = ((self.size - self.pos) as usize).min(self.block);
        let mut block = std::mem::take(&mut self.buf);
        block.resize(want, 0);
        let n = self
            .read_at(&mut block, self.pos)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        block.truncate(n);
        self.buf = block;
        self.buf_start = self.pos;
        Ok(())
    }

    fn buffered(&self) -> Option<&[u8]> {
        let end = self.buf_start + self.buf.len() as u64;
        if self.pos >= self.buf_start && self.pos < end {
            Some(&self.buf[(self.pos - self.buf_start) as usize..])
        } else {
            None
        }
    }
}

impl Read for SourceReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.refill()?;
        }
        let Some(avail) = self.buffered() else {
            return Ok(0);
        };
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of object")
        })?;
        self.pos = target;
        Ok(target)
    }
}

impl Drop for SourceReader {
    fn drop(&mut self) {
        if let Some(h) = self.raw.take() {
            self.source.close_raw(h);
        }
    }
}
