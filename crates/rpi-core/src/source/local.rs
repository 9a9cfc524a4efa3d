//! Filesystem-backed remote source rooted at a directory.
//!
//! Paths are resolved relative to the root and may not climb out of it.
//! This is the only built-in adapter that supports raw handles.

use super::{Actions, RawHandle, RemoteSource, SourceError, SourceFactory};
use crate::io_ext;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const COPY_CHUNK: usize = 256 * 1024;

pub struct LocalSource {
    root: Option<PathBuf>,
    handles: Mutex<HashMap<u64, Arc<File>>>,
    next_handle: AtomicU64,
    disconnected: AtomicBool,
    last_response: Mutex<String>,
}

impl Default for LocalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSource {
    pub fn new() -> Self {
        Self {
            root: None,
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            disconnected: AtomicBool::new(false),
            last_response: Mutex::new(String::new()),
        }
    }

    /// Connected source rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let mut source = Self::new();
        source.root = Some(root.into());
        source
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(SourceError::NotConnected);
        }
        let root = self.root.as_ref().ok_or(SourceError::NotConnected)?;
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(SourceError::NotFound(path.to_string()));
        }
        Ok(root.join(rel))
    }

    fn open(&self, path: &str) -> Result<File, SourceError> {
        let full = self.resolve(path)?;
        File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.to_string()),
            _ => SourceError::Io(e),
        })
    }

    fn record<T>(&self, result: Result<T, SourceError>) -> Result<T, SourceError> {
        let mut last = self
            .last_response
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match &result {
            Ok(_) => *last = "OK".to_string(),
            Err(e) => *last = e.to_string(),
        }
        result
    }

    fn copy_into(mut file: File, sink: &mut dyn Write, limit: u64) -> Result<u64, SourceError> {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut done = 0u64;
        while done < limit {
            let want = (limit - done).min(COPY_CHUNK as u64) as usize;
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink.write_all(&buf[..n])
                .map_err(|_| SourceError::SinkClosed)?;
            done += n as u64;
        }
        Ok(done)
    }
}

impl RemoteSource for LocalSource {
    fn connect(&mut self, url: &str, _username: &str, _password: &str) -> Result<(), SourceError> {
        let root = match url.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None => PathBuf::from(url),
        };
        if !root.is_dir() {
            return self.record(Err(SourceError::NotFound(root.display().to_string())));
        }
        self.root = Some(root);
        self.disconnected.store(false, Ordering::Release);
        self.record(Ok(()))
    }

    fn size(&self, path: &str) -> Result<u64, SourceError> {
        let result = self.resolve(path).and_then(|full| {
            let meta = std::fs::metadata(&full).map_err(|_| SourceError::NotFound(path.to_string()))?;
            if !meta.is_file() {
                return Err(SourceError::NotFound(path.to_string()));
            }
            Ok(meta.len())
        });
        self.record(result)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read_range(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        let result = self
            .open(path)
            .and_then(|f| Ok(io_ext::read_full_at(&f, buf, offset)?));
        self.record(result)
    }

    fn read_range_into(
        &self,
        path: &str,
        sink: &mut dyn Write,
        size: u64,
        offset: u64,
    ) -> Result<u64, SourceError> {
        let result = self.open(path).and_then(|mut f| {
            f.seek(SeekFrom::Start(offset))?;
            Self::copy_into(f, sink, size)
        });
        self.record(result)
    }

    fn get_into(&self, path: &str, sink: &mut dyn Write) -> Result<u64, SourceError> {
        let result = self
            .open(path)
            .and_then(|f| Self::copy_into(f, sink, u64::MAX));
        self.record(result)
    }

    fn open_raw(&self, path: &str) -> Result<RawHandle, SourceError> {
        let file = self.record(self.open(path))?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(file));
        Ok(RawHandle(id))
    }

    fn read_raw(&self, handle: RawHandle, buf: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        let file = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.0)
            .cloned()
            .ok_or(SourceError::NotConnected)?;
        Ok(io_ext::read_full_at(&file, buf, offset)?)
    }

    fn close_raw(&self, handle: RawHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0);
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::Release);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn actions(&self) -> Actions {
        Actions::all()
    }

    fn last_response(&self) -> String {
        self.last_response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Opens [`LocalSource`]s on a fixed root.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceFactory for LocalConnector {
    fn open(&self) -> Result<Box<dyn RemoteSource>, SourceError> {
        let mut source = LocalSource::new();
        source.connect(&self.root.to_string_lossy(), "", "")?;
        Ok(Box::new(source))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
