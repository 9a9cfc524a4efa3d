//! Logging init: `rpi.log` under the XDG state dir, or stderr when that is unavailable.
//!
//! The bridge, producers and pollers all run on their own threads, so thread
//! names are included in every line.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,rpi=debug,rpi_core=debug";

/// Log sink: the shared log file, or stderr when the handle cannot be cloned.
enum LogSink {
    File(File),
    Stderr,
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(f) => f.write(buf),
            LogSink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(f) => f.flush(),
            LogSink::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct SharedLogFile(File);

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(LogSink::File)
            .unwrap_or(LogSink::Stderr)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Path of the log file: `~/.local/state/rpi/rpi.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rpi")?;
    Ok(xdg_dirs.get_state_home().join("rpi.log"))
}

/// Initialize structured logging to the XDG state log file.
/// Returns Err when the state dir is unwritable; callers then use `init_logging_stderr`.
pub fn init_logging() -> Result<()> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("create log dir {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(BoxMakeWriter::new(SharedLogFile(file)))
        .with_thread_names(true)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install log subscriber: {}", e))?;

    tracing::info!("rpi logging initialized at {}", path.display());
    Ok(())
}

/// Stderr-only logging for hosts without a writable state dir.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_thread_names(true)
        .with_ansi(false)
        .try_init();
}
