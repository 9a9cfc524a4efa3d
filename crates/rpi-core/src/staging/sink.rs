//! `io::Write` adapter feeding a staging buffer from a producer thread.

use super::{StagingBuffer, StagingError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Producer-side writer. Refuses further bytes once the job's stop flag is
/// raised or the buffer is closed, which is what makes a source streaming
/// into it (curl callback, file copy, decoder loop) give up between chunks.
pub struct StagingSink {
    buffer: Arc<StagingBuffer>,
    stop: Arc<AtomicBool>,
    written: u64,
}

impl StagingSink {
    pub fn new(buffer: Arc<StagingBuffer>, stop: Arc<AtomicBool>) -> Self {
        Self {
            buffer,
            stop,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl io::Write for StagingSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.stop.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "producer stopped"));
        }
        match self.buffer.write(data) {
            Ok(()) => {
                self.written += data.len() as u64;
                Ok(data.len())
            }
            Err(StagingError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::new(io::ErrorKind::BrokenPipe, e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
