//! Producer threads that feed a job's staging buffer.
//!
//! Failures are recorded on the job and set the buffer's error flag; the
//! orchestrator decides the outcome. Every exit path closes the buffer.

use crate::archive::{ArchiveError, ArchiveHandle};
use crate::jobs::{Job, ProducerHandle};
use crate::source::{Actions, SharedSource};
use crate::staging::{StagingBuffer, StagingSink};
use std::io;
use std::sync::Arc;

fn buffer_of(job: &Job) -> io::Result<Arc<StagingBuffer>> {
    job.buffer()
        .cloned()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "job has no staging buffer"))
}

fn fail(job: &Job, buffer: &StagingBuffer, reason: String) {
    tracing::warn!(hash = %job.hash(), "producer failed: {}", reason);
    job.record_error(reason.clone());
    buffer.fail(reason);
}

/// Copies the whole object at `path` into the job's buffer, with one ranged
/// read when the source supports it, else one sequential download.
pub(crate) fn spawn_download(
    job: Arc<Job>,
    source: SharedSource,
    path: String,
) -> io::Result<ProducerHandle> {
    let buffer = buffer_of(&job)?;
    std::thread::Builder::new()
        .name("rpi-producer".into())
        .spawn(move || {
            let size = job.total_size();
            let mut sink = StagingSink::new(Arc::clone(&buffer), job.stop_flag());
            let result = if source.actions().contains(Actions::RANGED_READ) {
                source.read_range_into(&path, &mut sink, size, 0)
            } else {
                source.get_into(&path, &mut sink)
            };
            match result {
                Ok(n) if n >= size => {
                    tracing::debug!(hash = %job.hash(), bytes = n, "producer finished")
                }
                Ok(n) => fail(&job, &buffer, format!("source ended at {} of {} bytes", n, size)),
                Err(e) if job.is_stopped() => {
                    tracing::debug!(hash = %job.hash(), written = sink.written(), "producer stopped: {}", e)
                }
                Err(e) => fail(&job, &buffer, e.to_string()),
            }
            buffer.close();
            None
        })
}

/// Decodes the handle's current entry into the job's buffer and hands the
/// handle back for the next entry.
pub(crate) fn spawn_entry(
    job: Arc<Job>,
    mut handle: ArchiveHandle,
    chunk: usize,
) -> io::Result<ProducerHandle> {
    let buffer = buffer_of(&job)?;
    std::thread::Builder::new()
        .name("rpi-producer".into())
        .spawn(move || {
            let stop = job.stop_flag();
            let mut sink = StagingSink::new(Arc::clone(&buffer), Arc::clone(&stop));
            match handle.copy_current_into(&mut sink, &stop, chunk) {
                Ok(n) if n == job.total_size() => {
                    tracing::debug!(hash = %job.hash(), entry = %job.label(), bytes = n, "entry decoded")
                }
                Ok(n) => fail(
                    &job,
                    &buffer,
                    format!("entry decoded to {} bytes, expected {}", n, job.total_size()),
                ),
                Err(ArchiveError::Stopped) => {
                    tracing::debug!(hash = %job.hash(), "entry producer stopped")
                }
                Err(_) if job.is_stopped() => {
                    tracing::debug!(hash = %job.hash(), "entry producer stopped")
                }
                Err(e) => fail(&job, &buffer, e.to_string()),
            }
            buffer.close();
            Some(handle)
        })
}
