//! One streaming job: what the bridge serves under `/<kind>/<hash>`.

use crate::archive::ArchiveHandle;
use crate::source::SourceFactory;
use crate::staging::StagingBuffer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Route kind; the first path segment of a bridge URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Reads pass straight through to the remote source.
    Direct,
    /// Reads are served from a staging buffer fed by a download producer.
    Staged,
    /// Reads are served from a staging buffer fed by an archive decoder.
    Archive,
}

impl JobKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            JobKind::Direct => "rmt_inst",
            JobKind::Staged => "split_inst",
            JobKind::Archive => "archive_inst",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "rmt_inst" => Some(JobKind::Direct),
            "split_inst" => Some(JobKind::Staged),
            "archive_inst" => Some(JobKind::Archive),
            _ => None,
        }
    }
}

/// Backing store of a job.
#[derive(Clone)]
pub enum JobSource {
    /// A fresh connection is opened per bridge request and dropped when
    /// the response ends.
    Direct {
        factory: Arc<dyn SourceFactory>,
        path: String,
    },
    /// Long-lived buffer shared by every request until cleanup.
    Buffer(Arc<StagingBuffer>),
}

/// What a producer thread hands back when it finishes: the archive handle
/// for the next entry, if it decoded one.
pub type ProducerHandle = JoinHandle<Option<ArchiveHandle>>;

pub struct Job {
    hash: String,
    kind: JobKind,
    source: JobSource,
    total_size: u64,
    label: String,
    stop: Arc<AtomicBool>,
    producer: Mutex<Option<ProducerHandle>>,
    error: Mutex<Option<String>>,
    requests: AtomicU64,
    bytes_served: AtomicU64,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("hash", &self.hash)
            .field("kind", &self.kind)
            .field("total_size", &self.total_size)
            .field("label", &self.label)
            .finish()
    }
}

impl Job {
    pub fn new(
        hash: impl Into<String>,
        kind: JobKind,
        source: JobSource,
        total_size: u64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            kind,
            source,
            total_size,
            label: label.into(),
            stop: Arc::new(AtomicBool::new(false)),
            producer: Mutex::new(None),
            error: Mutex::new(None),
            requests: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Local bridge URL for this job.
    pub fn local_url(&self, port: u16) -> String {
        format!(
            "http://127.0.0.1:{}/{}/{}",
            port,
            self.kind.path_segment(),
            self.hash
        )
    }

    /// Stop flag shared with the producer.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> Option<&Arc<StagingBuffer>> {
        match &self.source {
            JobSource::Buffer(b) => Some(b),
            JobSource::Direct { .. } => None,
        }
    }

    /// Raises the stop flag and closes the buffer so blocked readers and
    /// the producer's next write both return promptly.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(buffer) = self.buffer() {
            buffer.close();
        }
    }

    pub fn attach_producer(&self, handle: ProducerHandle) {
        *self.producer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn take_producer(&self) -> Option<ProducerHandle> {
        self.producer.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Records a producer failure; the first one wins.
    pub fn record_error(&self, reason: impl Into<String>) {
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn note_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_served(&self, n: u64) {
        self.bytes_served.fetch_add(n, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }
}
