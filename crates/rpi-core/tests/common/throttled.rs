//! In-memory remote source whose streaming reads are paced, standing in for
//! a slow network adapter. `disconnect` interrupts a paced read at once.

use rpi_core::source::{Actions, RemoteSource, SourceError, SourceFactory};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Pace {
    /// Bytes written to the sink per step.
    pub step: usize,
    /// Sleep before each step.
    pub delay: Duration,
    /// A read that starts at or before this offset stops dead on reaching
    /// it until disconnected.
    pub stall_at: Option<u64>,
    /// A read that starts at or before this offset fails on reaching it
    /// with a connection reset.
    pub fail_at: Option<u64>,
    /// `size` blocks until disconnected.
    pub stall_size: bool,
}

impl Pace {
    pub fn steady(step: usize, delay: Duration) -> Self {
        Self {
            step,
            delay,
            stall_at: None,
            fail_at: None,
            stall_size: false,
        }
    }

    pub fn stalling_at(offset: u64) -> Self {
        Self {
            stall_at: Some(offset),
            ..Self::steady(16 * 1024, Duration::ZERO)
        }
    }

    pub fn failing_at(offset: u64) -> Self {
        Self {
            fail_at: Some(offset),
            ..Self::steady(16 * 1024, Duration::ZERO)
        }
    }

    pub fn stalling_size() -> Self {
        Self {
            stall_size: true,
            ..Self::steady(16 * 1024, Duration::ZERO)
        }
    }
}

pub struct ThrottledConnector {
    data: Arc<Vec<u8>>,
    pace: Pace,
    opened: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl ThrottledConnector {
    pub fn new(data: Vec<u8>, pace: Pace) -> Self {
        Self {
            data: Arc::new(data),
            pace,
            opened: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SourceFactory for ThrottledConnector {
    fn open(&self) -> Result<Box<dyn RemoteSource>, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ThrottledSource {
            data: Arc::clone(&self.data),
            pace: self.pace,
            disconnected: AtomicBool::new(false),
            disconnects: Arc::clone(&self.disconnects),
        }))
    }

    fn describe(&self) -> String {
        "throttled://memory".to_string()
    }
}

pub struct ThrottledSource {
    data: Arc<Vec<u8>>,
    pace: Pace,
    disconnected: AtomicBool,
    disconnects: Arc<AtomicUsize>,
}

impl ThrottledSource {
    fn check(&self) -> Result<(), SourceError> {
        if self.disconnected.load(Ordering::Acquire) {
            Err(SourceError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Sleeps `d` in short slices, failing as soon as the source is
    /// disconnected.
    fn pause(&self, d: Duration) -> Result<(), SourceError> {
        let until = Instant::now() + d;
        while Instant::now() < until {
            self.check()?;
            std::thread::sleep(Duration::from_millis(2));
        }
        self.check()
    }

    fn reset() -> SourceError {
        SourceError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    fn stall(&self) -> Result<(), SourceError> {
        loop {
            self.check()?;
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl RemoteSource for ThrottledSource {
    fn connect(&mut self, _url: &str, _username: &str, _password: &str) -> Result<(), SourceError> {
        self.disconnected.store(false, Ordering::Release);
        Ok(())
    }

    fn size(&self, _path: &str) -> Result<u64, SourceError> {
        if self.pace.stall_size {
            self.stall()?;
        }
        self.check()?;
        Ok(self.data.len() as u64)
    }

    fn exists(&self, _path: &str) -> bool {
        true
    }

    fn read_range(&self, _path: &str, buf: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        self.check()?;
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        let covers = |at: u64| at >= offset && at < offset + n as u64;
        if self.pace.fail_at.is_some_and(covers) {
            return Err(Self::reset());
        }
        if self.pace.stall_at.is_some_and(covers) {
            self.stall()?;
        }
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn read_range_into(
        &self,
        _path: &str,
        sink: &mut dyn Write,
        size: u64,
        offset: u64,
    ) -> Result<u64, SourceError> {
        let end = offset.saturating_add(size).min(self.data.len() as u64);
        let stall_at = self.pace.stall_at.filter(|&at| at >= offset);
        let fail_at = self.pace.fail_at.filter(|&at| at >= offset);
        let mut pos = offset;
        while pos < end {
            if fail_at.is_some_and(|at| pos >= at) {
                return Err(Self::reset());
            }
            if stall_at.is_some_and(|at| pos >= at) {
                self.stall()?;
            }
            self.pause(self.pace.delay)?;
            let mut step_end = (pos + self.pace.step as u64).min(end);
            for at in [stall_at, fail_at].into_iter().flatten() {
                if at > pos {
                    step_end = step_end.min(at);
                }
            }
            sink.write_all(&self.data[pos as usize..step_end as usize])
                .map_err(|_| SourceError::SinkClosed)?;
            pos = step_end;
        }
        Ok(pos - offset)
    }

    fn get_into(&self, path: &str, sink: &mut dyn Write) -> Result<u64, SourceError> {
        self.read_range_into(path, sink, self.data.len() as u64, 0)
    }

    fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn actions(&self) -> Actions {
        Actions::DOWNLOAD | Actions::INSTALL | Actions::RANGED_READ
    }

    fn last_response(&self) -> String {
        if self.disconnected.load(Ordering::Acquire) {
            "disconnected".to_string()
        } else {
            "OK".to_string()
        }
    }
}
