//! Disk-backed staging buffer ("split file").
//!
//! One sequential writer appends; any number of readers read at arbitrary
//! offsets. Bytes live in fixed-size chunk files `<name>.0`, `<name>.1`, ...
//! so no single file grows past the chunk size and cleanup only touches
//! chunks that were actually created.
//!
//! Readers never see bytes past the write cursor. A read blocks while its
//! range is not yet written and the buffer is open, waking at least every
//! `read_poll` to re-check; `close` and `fail` wake all readers immediately.

mod error;
mod sink;

pub use error::StagingError;
pub use sink::StagingSink;

use crate::io_ext;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct State {
    cursor: u64,
    closed: bool,
    error: Option<String>,
    expected_size: Option<u64>,
    chunks: Vec<Arc<File>>,
    /// Set by `discard`; no chunk file may be created afterwards.
    discarded: bool,
}

/// Snapshot of buffer progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingStatus {
    pub written: u64,
    pub expected_size: Option<u64>,
    pub closed: bool,
    pub error: Option<String>,
}

pub struct StagingBuffer {
    dir: PathBuf,
    name: String,
    chunk_size: u64,
    read_poll: Duration,
    state: Mutex<State>,
    wake: Condvar,
    /// Serializes writers; the cursor is only advanced after the bytes are on disk.
    write_lock: Mutex<()>,
}

impl StagingBuffer {
    /// Creates the staging directory and removes stale chunks left under
    /// `name` by an earlier run.
    pub fn open(
        dir: &Path,
        name: &str,
        chunk_size: u64,
        read_poll: Duration,
    ) -> Result<Self, StagingError> {
        fs::create_dir_all(dir)?;
        let buffer = Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            chunk_size: chunk_size.max(1),
            read_poll,
            state: Mutex::new(State {
                cursor: 0,
                closed: false,
                error: None,
                expected_size: None,
                chunks: Vec::new(),
                discarded: false,
            }),
            wake: Condvar::new(),
            write_lock: Mutex::new(()),
        };
        let mut index = 0;
        while buffer.chunk_path(index).exists() {
            fs::remove_file(buffer.chunk_path(index))?;
            index += 1;
        }
        tracing::debug!(
            dir = %dir.display(),
            name,
            chunk_size = buffer.chunk_size,
            "staging buffer opened"
        );
        Ok(buffer)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, index))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declares the total size once known. Reads are clamped to it.
    pub fn set_expected_size(&self, size: u64) {
        self.lock().expected_size = Some(size);
        self.wake.notify_all();
    }

    pub fn status(&self) -> StagingStatus {
        let state = self.lock();
        StagingStatus {
            written: state.cursor,
            expected_size: state.expected_size,
            closed: state.closed,
            error: state.error.clone(),
        }
    }

    pub fn written(&self) -> u64 {
        self.lock().cursor
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Appends `data`. Fails if closed, if the error flag is set, or on
    /// local I/O error (which also sets the error flag).
    pub fn write(&self, data: &[u8]) -> Result<(), StagingError> {
        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut pos = {
            let state = self.lock();
            if let Some(err) = &state.error {
                return Err(StagingError::Failed(err.clone()));
            }
            if state.closed {
                return Err(StagingError::Closed);
            }
            state.cursor
        };
        let mut rest = data;
        while !rest.is_empty() {
            let index = (pos / self.chunk_size) as usize;
            let within = pos % self.chunk_size;
            let n = ((self.chunk_size - within) as usize).min(rest.len());
            let file = match self.chunk_for_write(index) {
                Ok(f) => f,
                Err(e) => return Err(self.record_write_error(e)),
            };
            if let Err(e) = io_ext::write_all_at(&file, &rest[..n], within) {
                return Err(self.record_write_error(e));
            }
            pos += n as u64;
            rest = &rest[n..];
            // Publish per chunk so readers waiting on this chunk wake early.
            self.lock().cursor = pos;
            self.wake.notify_all();
        }
        Ok(())
    }

    fn chunk_for_write(&self, index: usize) -> std::io::Result<Arc<File>> {
        // Held across the open so `discard` cannot miss a new chunk.
        let mut state = self.lock();
        if state.discarded {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "staging buffer discarded",
            ));
        }
        if let Some(f) = state.chunks.get(index) {
            return Ok(Arc::clone(f));
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.chunk_path(index))?;
        let file = Arc::new(file);
        state.chunks.push(Arc::clone(&file));
        Ok(file)
    }

    fn record_write_error(&self, e: std::io::Error) -> StagingError {
        tracing::warn!(name = %self.name, "staging write failed: {}", e);
        self.lock().error = Some(e.to_string());
        self.wake.notify_all();
        StagingError::Io(e)
    }

    /// Marks no more writes and wakes every blocked reader.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!(name = %self.name, written = state.cursor, "staging buffer closed");
        }
        drop(state);
        self.wake.notify_all();
    }

    /// Sets the error flag (producer failure) and wakes readers. The
    /// reason is reported to the next call on either side.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        if state.error.is_none() {
            state.error = Some(reason.into());
        }
        drop(state);
        self.wake.notify_all();
    }

    /// Closes the buffer and deletes its chunk files now, even while a
    /// producer that could not be joined still holds a reference. Reads and
    /// writes fail from here on.
    pub fn discard(&self) {
        let count = {
            let mut state = self.lock();
            state.closed = true;
            state.discarded = true;
            state
                .error
                .get_or_insert_with(|| "staging buffer discarded".to_string());
            std::mem::take(&mut state.chunks).len()
        };
        self.wake.notify_all();
        self.remove_chunks(count);
        tracing::debug!(name = %self.name, chunks = count, "staging buffer discarded");
    }

    fn remove_chunks(&self, count: usize) {
        for index in 0..count {
            let path = self.chunk_path(index);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to remove staging chunk: {}", e);
            }
        }
    }

    /// Reads bytes at `offset`. Blocks (in `read_poll` steps) until
    /// `offset + buf.len()` is written or the buffer is closed, then returns
    /// what is available, which is short or zero only once closed or at the
    /// expected size.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, StagingError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (available, chunks) = {
            let mut state = self.lock();
            loop {
                if let Some(err) = &state.error {
                    return Err(StagingError::Failed(err.clone()));
                }
                let mut want_end = offset + buf.len() as u64;
                if let Some(total) = state.expected_size {
                    want_end = want_end.min(total);
                }
                if state.cursor >= want_end || state.closed {
                    break (state.cursor.min(want_end), state.chunks.clone());
                }
                let (next, _) = self
                    .wake
                    .wait_timeout(state, self.read_poll)
                    .unwrap_or_else(|e| e.into_inner());
                state = next;
            }
        };
        if offset >= available {
            return Ok(0);
        }
        let total = (available - offset) as usize;
        let mut done = 0;
        while done < total {
            let pos = offset + done as u64;
            let index = (pos / self.chunk_size) as usize;
            let within = pos % self.chunk_size;
            let n = ((self.chunk_size - within) as usize).min(total - done);
            let Some(file) = chunks.get(index) else {
                break;
            };
            let got = io_ext::read_full_at(file, &mut buf[done..done + n], within)?;
            done += got;
            if got < n {
                break;
            }
        }
        Ok(done)
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        let count = std::mem::take(&mut self.lock().chunks).len();
        self.remove_chunks(count);
        tracing::debug!(name = %self.name, chunks = count, "staging buffer removed");
    }
}
