//! Development installer: mirrors whatever the bridge serves into a
//! directory, pulling it the way the device does (HEAD, header read, then
//! parallel byte-range GETs).

use super::output::{OutputFile, SegmentSink};
use super::segments::{plan_segments, Segment};
use super::{InstallProgress, InstallStatus, InstallerError, PackageInstaller};
use crate::package::{PackageHeader, HEADER_LEN};
use crate::retry::RetryPolicy;
use crate::source::{split_url, HttpSource, RemoteSource, SourceError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Reported when a range pull fails.
pub const ERROR_TRANSFER: u32 = 0x8001_0001;
/// Reported when the mirrored file cannot be written or renamed.
pub const ERROR_OUTPUT: u32 = 0x8001_0002;

const DEFAULT_SEGMENTS: usize = 4;
const MIN_SEGMENT: u64 = 1024 * 1024;

type Outcome = Result<PathBuf, (u32, String)>;

struct Task {
    total: u64,
    transferred: AtomicU64,
    outcome: Mutex<Option<Outcome>>,
}

impl Task {
    fn progress(&self) -> InstallProgress {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        let (status, error_code) = match outcome.as_ref() {
            None => (InstallStatus::Running, 0),
            Some(Ok(_)) => (InstallStatus::Playable, 0),
            Some(Err((code, _))) => (InstallStatus::Error, *code),
        };
        InstallProgress {
            status,
            error_code,
            bytes_total: self.total,
            bytes_transferred: self.transferred.load(Ordering::Relaxed),
        }
    }

    fn finish(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
    }
}

pub struct MirrorInstaller {
    out_dir: PathBuf,
    max_segments: usize,
    min_segment: u64,
    retry: RetryPolicy,
    tasks: Mutex<HashMap<String, Arc<Task>>>,
}

impl MirrorInstaller {
    pub fn new(out_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            out_dir: out_dir.into(),
            max_segments: DEFAULT_SEGMENTS,
            min_segment: MIN_SEGMENT,
            retry,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_segments(mut self, max_segments: usize, min_segment: u64) -> Self {
        self.max_segments = max_segments.max(1);
        self.min_segment = min_segment.max(1);
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Where a finished install of `content_id` was written.
    pub fn output_path(&self, content_id: &str) -> Option<PathBuf> {
        let task = self.task(content_id)?;
        let outcome = task.outcome.lock().unwrap_or_else(|e| e.into_inner());
        match outcome.as_ref() {
            Some(Ok(path)) => Some(path.clone()),
            _ => None,
        }
    }

    /// Failure text of a finished install.
    pub fn failure(&self, content_id: &str) -> Option<String> {
        let task = self.task(content_id)?;
        let outcome = task.outcome.lock().unwrap_or_else(|e| e.into_inner());
        match outcome.as_ref() {
            Some(Err((_, reason))) => Some(reason.clone()),
            _ => None,
        }
    }

    fn task(&self, content_id: &str) -> Option<Arc<Task>> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(content_id)
            .cloned()
    }
}

fn file_stem(content_id: &str) -> String {
    content_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl PackageInstaller for MirrorInstaller {
    fn submit(&self, uri: &str, display_name: &str) -> Result<(), InstallerError> {
        let reject = |reason: String| InstallerError::Rejected {
            uri: uri.to_string(),
            reason,
        };
        let (origin, path) = split_url(uri).map_err(|e| reject(e.to_string()))?;
        let mut source = HttpSource::with_retry(self.retry);
        source
            .connect(&origin, "", "")
            .map_err(|e| reject(e.to_string()))?;
        let size = source.size(&path).map_err(|e| reject(e.to_string()))?;
        let mut head = [0u8; HEADER_LEN];
        let n = source
            .read_range(&path, &mut head, 0)
            .map_err(|e| reject(e.to_string()))?;
        let header = PackageHeader::parse(&head[..n]).map_err(|e| reject(e.to_string()))?;
        if header.content_id.is_empty() {
            return Err(reject("package has no content id".to_string()));
        }

        std::fs::create_dir_all(&self.out_dir)?;
        let final_path = self
            .out_dir
            .join(format!("{}.pkg", file_stem(&header.content_id)));
        let out = OutputFile::create(&final_path, size)?;
        let task = Arc::new(Task {
            total: size,
            transferred: AtomicU64::new(0),
            outcome: Mutex::new(None),
        });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(header.content_id.clone(), Arc::clone(&task));

        let segments = plan_segments(size, self.max_segments, self.min_segment);
        tracing::info!(
            content_id = %header.content_id,
            name = display_name,
            size,
            segments = segments.len(),
            "mirror install started"
        );
        let content_id = header.content_id;
        std::thread::Builder::new()
            .name("rpi-mirror".into())
            .spawn(move || {
                let outcome = transfer(&source, &path, &segments, &out, &task);
                let outcome = match outcome {
                    Ok(()) => out
                        .finalize(&final_path)
                        .map(|()| final_path)
                        .map_err(|e| (ERROR_OUTPUT, e.to_string())),
                    Err(e) => {
                        out.discard();
                        Err((ERROR_TRANSFER, e.to_string()))
                    }
                };
                match &outcome {
                    Ok(path) => tracing::info!(content_id = %content_id, path = %path.display(), "mirror install complete"),
                    Err((code, reason)) => tracing::warn!(content_id = %content_id, code, "mirror install failed: {}", reason),
                }
                task.finish(outcome);
            })?;
        Ok(())
    }

    fn poll(&self, content_id: &str) -> Result<InstallProgress, InstallerError> {
        Ok(self
            .task(content_id)
            .map_or_else(InstallProgress::none, |task| task.progress()))
    }
}

/// Pulls every segment on its own thread. The first failure disconnects
/// the source, which aborts the other pulls.
fn transfer(
    source: &HttpSource,
    path: &str,
    segments: &[Segment],
    out: &OutputFile,
    task: &Task,
) -> Result<(), SourceError> {
    std::thread::scope(|scope| {
        let workers: Vec<_> = segments
            .iter()
            .map(|segment| {
                scope.spawn(move || {
                    let mut sink = SegmentSink {
                        out,
                        offset: segment.start,
                        progress: &task.transferred,
                    };
                    let result = source
                        .read_range_into(path, &mut sink, segment.len(), segment.start)
                        .and_then(|got| {
                            if got == segment.len() {
                                Ok(())
                            } else {
                                Err(SourceError::ShortRead {
                                    expected: segment.len(),
                                    received: got,
                                })
                            }
                        });
                    if result.is_err() {
                        source.disconnect();
                    }
                    result
                })
            })
            .collect();
        let mut first_error = None;
        for worker in workers {
            let result = worker.join().unwrap_or_else(|_| {
                Err(SourceError::Io(std::io::Error::other("segment worker panicked")))
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}
