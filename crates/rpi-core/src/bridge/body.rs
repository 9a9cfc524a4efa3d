//! Response bodies as pull providers.
//!
//! A provider yields the bytes of one resolved range, chunk by chunk, from a
//! job's backing store. [`BodyReader`] adapts a provider to `io::Read` for the
//! HTTP layer and runs the provider's teardown when the response ends,
//! whether it completed or the client went away.

use super::range::ByteRange;
use super::BridgeError;
use crate::jobs::Job;
use crate::source::{RemoteSource, SourceFactory};
use crate::staging::StagingBuffer;
use std::io::{self, Read};
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    Eof,
}

pub trait RangeProvider: Send {
    /// Next piece of the range, at most `max` bytes.
    fn next_chunk(&mut self, max: usize) -> Result<Chunk, BridgeError>;

    /// Called exactly once when the response is over.
    fn finish(&mut self) {}
}

/// Reads straight from a connection opened for this request only.
pub struct DirectProvider {
    source: Box<dyn RemoteSource>,
    path: String,
    next: u64,
    end: u64,
}

impl DirectProvider {
    pub fn open(
        factory: &dyn SourceFactory,
        path: &str,
        range: ByteRange,
    ) -> Result<Self, BridgeError> {
        let source = factory.open()?;
        Ok(Self::with_source(source, path, range))
    }

    pub fn with_source(source: Box<dyn RemoteSource>, path: &str, range: ByteRange) -> Self {
        Self {
            source,
            path: path.to_string(),
            next: range.start,
            end: range.end + 1,
        }
    }
}

impl RangeProvider for DirectProvider {
    fn next_chunk(&mut self, max: usize) -> Result<Chunk, BridgeError> {
        if self.next >= self.end {
            return Ok(Chunk::Eof);
        }
        let want = ((self.end - self.next) as usize).min(max.max(1));
        let mut buf = vec![0u8; want];
        let n = self.source.read_range(&self.path, &mut buf, self.next)?;
        if n == 0 {
            return Ok(Chunk::Eof);
        }
        buf.truncate(n);
        self.next += n as u64;
        Ok(Chunk::Data(buf))
    }

    fn finish(&mut self) {
        self.source.disconnect();
    }
}

/// Reads from a job's staging buffer, blocking until the producer has
/// written the bytes or the buffer is closed.
pub struct BufferProvider {
    buffer: Arc<StagingBuffer>,
    next: u64,
    end: u64,
}

impl BufferProvider {
    pub fn new(buffer: Arc<StagingBuffer>, range: ByteRange) -> Self {
        Self {
            buffer,
            next: range.start,
            end: range.end + 1,
        }
    }
}

impl RangeProvider for BufferProvider {
    fn next_chunk(&mut self, max: usize) -> Result<Chunk, BridgeError> {
        if self.next >= self.end {
            return Ok(Chunk::Eof);
        }
        let want = ((self.end - self.next) as usize).min(max.max(1));
        let mut buf = vec![0u8; want];
        let n = self.buffer.read(&mut buf, self.next)?;
        if n == 0 {
            return Ok(Chunk::Eof);
        }
        buf.truncate(n);
        self.next += n as u64;
        Ok(Chunk::Data(buf))
    }
}

pub struct BodyReader {
    provider: Box<dyn RangeProvider>,
    job: Arc<Job>,
    chunk: usize,
    expected: u64,
    delivered: u64,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl BodyReader {
    pub fn new(provider: Box<dyn RangeProvider>, job: Arc<Job>, expected: u64, chunk: usize) -> Self {
        Self {
            provider,
            job,
            chunk: chunk.max(4096),
            expected,
            delivered: 0,
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.pending.len() {
                let n = (self.pending.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                self.delivered += n as u64;
                return Ok(n);
            }
            if self.done || out.is_empty() {
                return Ok(0);
            }
            if self.job.is_stopped() {
                self.done = true;
                return Err(io::Error::new(io::ErrorKind::Other, BridgeError::Stopped));
            }
            match self.provider.next_chunk(self.chunk) {
                Ok(Chunk::Data(data)) => {
                    self.pending = data;
                    self.pos = 0;
                }
                Ok(Chunk::Eof) => self.done = true,
                Err(e) => {
                    self.done = true;
                    tracing::warn!(hash = %self.job.hash(), offset = self.delivered, "range body failed: {}", e);
                    return Err(io::Error::new(io::ErrorKind::Other, e));
                }
            }
        }
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        self.provider.finish();
        self.job.note_served(self.delivered);
        if self.delivered < self.expected {
            tracing::debug!(
                hash = %self.job.hash(),
                delivered = self.delivered,
                expected = self.expected,
                "range response ended short"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, JobSource};
    use crate::source::LocalSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    fn drain(provider: &mut dyn RangeProvider, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while let Chunk::Data(d) = provider.next_chunk(max).unwrap() {
            assert!(d.len() <= max);
            out.extend(d);
        }
        out
    }

    #[test]
    fn direct_provider_pulls_range_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(dir.path().join("p.pkg"), &data).unwrap();
        let mut p =
            DirectProvider::with_source(Box::new(LocalSource::at(dir.path())), "/p.pkg", range(100, 1099));
        assert_eq!(drain(&mut p, 300), &data[100..1100]);
        assert_eq!(p.next_chunk(300).unwrap(), Chunk::Eof);
    }

    #[test]
    fn buffer_provider_returns_eof_when_closed_short() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Arc::new(
            StagingBuffer::open(dir.path(), "b", 64, Duration::from_millis(5)).unwrap(),
        );
        buffer.write(&[7u8; 100]).unwrap();
        buffer.close();
        let mut p = BufferProvider::new(Arc::clone(&buffer), range(50, 199));
        assert_eq!(drain(&mut p, 1000), vec![7u8; 50]);
    }

    struct Counting {
        finished: Arc<AtomicBool>,
        left: usize,
    }

    impl RangeProvider for Counting {
        fn next_chunk(&mut self, _max: usize) -> Result<Chunk, BridgeError> {
            if self.left == 0 {
                return Ok(Chunk::Eof);
            }
            self.left -= 1;
            Ok(Chunk::Data(vec![1, 2, 3]))
        }

        fn finish(&mut self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    fn job() -> Arc<Job> {
        let dir = tempfile::tempdir().unwrap();
        let buffer =
            Arc::new(StagingBuffer::open(dir.path(), "j", 64, Duration::from_millis(5)).unwrap());
        Arc::new(Job::new("h.pkg", JobKind::Staged, JobSource::Buffer(buffer), 9, "j"))
    }

    #[test]
    fn body_reader_runs_teardown_on_drop() {
        let finished = Arc::new(AtomicBool::new(false));
        let job = job();
        let provider = Counting { finished: Arc::clone(&finished), left: 3 };
        let mut body = BodyReader::new(Box::new(provider), Arc::clone(&job), 9, 4096);
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 1, 2, 3, 1, 2, 3]);
        assert!(!finished.load(Ordering::SeqCst));
        drop(body);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(job.bytes_served(), 9);
    }

    #[test]
    fn body_reader_teardown_after_partial_read() {
        let finished = Arc::new(AtomicBool::new(false));
        let provider = Counting { finished: Arc::clone(&finished), left: 10 };
        let mut body = BodyReader::new(Box::new(provider), job(), 30, 4096);
        let mut two = [0u8; 2];
        body.read_exact(&mut two).unwrap();
        drop(body);
        assert!(finished.load(Ordering::SeqCst));
    }
}
