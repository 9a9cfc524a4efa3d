//! Output file for mirrored packages: preallocated `.part` file written at
//! offsets from several threads, renamed into place when complete.

use crate::io_ext;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const TEMP_SUFFIX: &str = ".part";

/// `game.pkg` → `game.pkg.part`.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

#[derive(Clone)]
pub struct OutputFile {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl OutputFile {
    /// Creates (or truncates) the temp file for `final_path` and sizes it.
    pub fn create(final_path: &Path, size: u64) -> io::Result<Self> {
        let temp_path = temp_path(final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.set_len(size)?;
        Ok(Self {
            file: Arc::new(file),
            temp_path,
        })
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        io_ext::write_all_at(&self.file, data, offset)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Syncs and renames onto `final_path`.
    pub fn finalize(self, final_path: &Path) -> io::Result<()> {
        self.file.sync_all()?;
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::rename(&temp_path, final_path)
    }

    /// Removes the temp file after a failed transfer.
    pub fn discard(self) {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        if let Err(e) = std::fs::remove_file(&temp_path) {
            tracing::warn!(path = %temp_path.display(), "failed to remove partial output: {}", e);
        }
    }
}

/// `io::Write` view of one segment of an [`OutputFile`].
pub(super) struct SegmentSink<'a> {
    pub(super) out: &'a OutputFile,
    pub(super) offset: u64,
    pub(super) progress: &'a std::sync::atomic::AtomicU64,
}

impl io::Write for SegmentSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.out.write_at(self.offset, data)?;
        self.offset += data.len() as u64;
        self.progress
            .fetch_add(data.len() as u64, std::sync::atomic::Ordering::Relaxed);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
