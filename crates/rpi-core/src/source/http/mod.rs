//! HTTP(S) remote source over libcurl.
//!
//! Sizes come from HEAD (falling back to a `bytes=0-0` request for servers that
//! reject HEAD), reads are `Range` GETs. A server that answers a ranged GET
//! with a full 200 body at a non-zero offset is refused rather than silently
//! streamed from the wrong position.

mod headers;

use super::{Actions, RemoteSource, SliceSink, SourceError, SourceFactory};
use crate::retry::{self, RetryDecision, RetryPolicy};
use headers::HeadInfo;
use std::cell::Cell;
use std::io::Write;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remote source for `http://` and `https://` URLs.
pub struct HttpSource {
    origin: Option<String>,
    credentials: Option<(String, String)>,
    retry: RetryPolicy,
    aborted: Arc<AtomicBool>,
    last_response: Mutex<String>,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSource {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            origin: None,
            credentials: None,
            retry,
            aborted: Arc::new(AtomicBool::new(false)),
            last_response: Mutex::new(String::new()),
        }
    }

    fn full_url(&self, path: &str) -> Result<String, SourceError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(SourceError::NotConnected);
        }
        let origin = self.origin.as_deref().ok_or(SourceError::NotConnected)?;
        if path.starts_with('/') {
            Ok(format!("{}{}", origin, path))
        } else {
            Ok(format!("{}/{}", origin, path))
        }
    }

    fn easy(&self, url: &str) -> Result<curl::easy::Easy, SourceError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(Duration::from_secs(15))?;
        // Abort if throughput drops below 1 KiB/s for 60s.
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(Duration::from_secs(60))?;
        if let Some((user, pass)) = &self.credentials {
            easy.username(user)?;
            easy.password(pass)?;
        }
        // Progress callbacks let `disconnect` abort a transfer stuck in recv.
        easy.progress(true)?;
        Ok(easy)
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

    fn head(&self, url: &str) -> Result<HeadInfo, SourceError> {
        let mut lines: Vec<String> = Vec::new();
        let mut easy = self.easy(url)?;
        easy.nobody(true)?;
        {
            let aborted = Arc::clone(&self.aborted);
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.progress_function(move |_, _, _, _| !aborted.load(Ordering::Acquire))?;
            transfer.perform()?;
        }
        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(SourceError::Http(code));
        }
        Ok(headers::parse_headers(&lines))
    }

    /// `bytes=0-0` GET for servers that do not answer HEAD with a length.
    fn size_from_zero_range(&self, url: &str) -> Result<HeadInfo, SourceError> {
        let mut lines: Vec<String> = Vec::new();
        let mut easy = self.easy(url)?;
        easy.range("0-0")?;
        {
            let aborted = Arc::clone(&self.aborted);
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })?;
            // Discard the body; a server ignoring the range would send it all.
            transfer.write_function(|data| Ok(data.len().min(1)))?;
            transfer.progress_function(move |_, _, _, _| !aborted.load(Ordering::Acquire))?;
            match transfer.perform() {
                Ok(()) => {}
                Err(e) if e.is_write_error() => {}
                Err(e) => return Err(e.into()),
            }
        }
        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(SourceError::Http(code));
        }
        Ok(headers::parse_headers(&lines))
    }

    /// One GET, optionally ranged to `[start, start+len)`. Returns bytes
    /// written to `sink`.
    fn transfer(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        sink: &mut dyn Write,
    ) -> Result<u64, SourceError> {
        let mut easy = self.easy(url)?;
        if let Some((start, len)) = range {
            easy.range(&format!("{}-{}", start, start + len - 1))?;
        }
        let status = Cell::new(0u32);
        let delivered = Cell::new(0u64);
        let sink_failed = Cell::new(false);
        let range_ignored = Cell::new(false);
        {
            let aborted = Arc::clone(&self.aborted);
            let mut transfer = easy.transfer();
            transfer.header_function(|line| {
                if let Some(code) = headers::status_code(line) {
                    status.set(code);
                }
                true
            })?;
            transfer.write_function(|data| {
                if let Some((start, len)) = range {
                    if status.get() == 200 && start > 0 {
                        range_ignored.set(true);
                        return Ok(0);
                    }
                    // Full 200 body from offset 0: keep only the requested span.
                    let room = len.saturating_sub(delivered.get());
                    if room == 0 {
                        return Ok(0);
                    }
                    let take = (data.len() as u64).min(room) as usize;
                    if sink.write_all(&data[..take]).is_err() {
                        sink_failed.set(true);
                        return Ok(0);
                    }
                    delivered.set(delivered.get() + take as u64);
                    return Ok(if take == data.len() { data.len() } else { 0 });
                }
                if sink.write_all(data).is_err() {
                    sink_failed.set(true);
                    return Ok(0);
                }
                delivered.set(delivered.get() + data.len() as u64);
                Ok(data.len())
            })?;
            transfer.progress_function(move |_, _, _, _| !aborted.load(Ordering::Acquire))?;
            if let Err(e) = transfer.perform() {
                if sink_failed.get() {
                    return Err(SourceError::SinkClosed);
                }
                if range_ignored.get() {
                    return Err(SourceError::Unsupported("ranged read"));
                }
                let satisfied = range.is_some_and(|(_, len)| delivered.get() == len);
                if !(e.is_write_error() && satisfied) {
                    if self.aborted.load(Ordering::Acquire) {
                        return Err(SourceError::NotConnected);
                    }
                    return Err(e.into());
                }
            }
        }
        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(SourceError::Http(code));
        }
        Ok(delivered.get())
    }
}

impl RemoteSource for HttpSource {
    fn connect(&mut self, url: &str, username: &str, password: &str) -> Result<(), SourceError> {
        let parsed = url::Url::parse(url).map_err(|e| SourceError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        let (origin, _) = super::split_url(url)?;
        self.origin = Some(origin);
        self.credentials = if username.is_empty() {
            None
        } else {
            Some((username.to_string(), password.to_string()))
        };
        self.aborted.store(false, Ordering::Release);
        tracing::debug!(url, "http source connected");
        self.record(Ok(()))
    }

    fn size(&self, path: &str) -> Result<u64, SourceError> {
        let result = self.full_url(path).and_then(|url| {
            let from_head = retry::run_with_retry(&self.retry, || self.head(&url));
            match from_head {
                Ok(info) if info.total_size().is_some() => Ok(info),
                Ok(_) | Err(SourceError::Http(405 | 403 | 501)) => {
                    retry::run_with_retry(&self.retry, || self.size_from_zero_range(&url))
                }
                Err(e) => Err(e),
            }
        });
        let size = result.and_then(|info| {
            info.total_size()
                .ok_or_else(|| SourceError::NotFound(format!("{} (no content length)", path)))
        });
        self.record(size)
    }

    fn exists(&self, path: &str) -> bool {
        self.size(path).is_ok()
    }

    fn read_range(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len() as u64;
        let result = self.full_url(path).and_then(|url| {
            retry::run_with_retry(&self.retry, || {
                let mut sink = SliceSink::new(buf);
                self.transfer(&url, Some((offset, len)), &mut sink)?;
                Ok(sink.filled())
            })
        });
        self.record(result)
    }

    /// Resumes from the last delivered byte after a retryable failure, so
    /// the sink never sees a byte twice.
    fn read_range_into(
        &self,
        path: &str,
        sink: &mut dyn Write,
        size: u64,
        offset: u64,
    ) -> Result<u64, SourceError> {
        if size == 0 {
            return Ok(0);
        }
        let url = match self.full_url(path) {
            Ok(url) => url,
            Err(e) => return self.record(Err(e)),
        };
        let mut done = 0u64;
        let mut attempt = 1u32;
        loop {
            let remaining = size - done;
            let mut counter = CountingSink { inner: &mut *sink, written: 0 };
            let outcome = self.transfer(&url, Some((offset + done, remaining)), &mut counter);
            done += counter.written;
            let err = match outcome {
                Ok(_) if done == size => return self.record(Ok(done)),
                // Short body: the object ended early.
                Ok(_) if counter.written == 0 => return self.record(Ok(done)),
                Ok(_) => SourceError::ShortRead { expected: size, received: done },
                Err(e) => e,
            };
            match self.retry.decide(attempt, retry::classify(&err)) {
                RetryDecision::NoRetry => return self.record(Err(err)),
                RetryDecision::RetryAfter(d) => {
                    tracing::debug!(path, offset, done, attempt, "ranged read interrupted: {}", err);
                    std::thread::sleep(d);
                    attempt += 1;
                }
            }
        }
    }

    fn get_into(&self, path: &str, sink: &mut dyn Write) -> Result<u64, SourceError> {
        let result = self
            .full_url(path)
            .and_then(|url| self.transfer(&url, None, sink));
        self.record(result)
    }

    fn disconnect(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn actions(&self) -> Actions {
        Actions::DOWNLOAD | Actions::INSTALL | Actions::EXTRACT | Actions::RANGED_READ
    }

    fn last_response(&self) -> String {
        self.last_response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct CountingSink<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl Write for CountingSink<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(data)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Opens a fresh [`HttpSource`] per call; used by direct-remote jobs.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    url: String,
    username: String,
    password: String,
    retry: RetryPolicy,
}

impl HttpConnector {
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: String::new(),
            retry,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }
}

impl SourceFactory for HttpConnector {
    fn open(&self) -> Result<Box<dyn RemoteSource>, SourceError> {
        let mut source = HttpSource::with_retry(self.retry);
        source.connect(&self.url, &self.username, &self.password)?;
        Ok(Box::new(source))
    }

    fn describe(&self) -> String {
        super::split_url(&self.url)
            .map(|(origin, _)| origin)
            .unwrap_or_else(|_| self.url.clone())
    }
}
