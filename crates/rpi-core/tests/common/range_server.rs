//! Minimal HTTP/1.1 origin for integration tests: serves a fixed set of
//! objects by path, answering HEAD with the length and single-range GETs
//! with 206. Stands in for the remote storage endpoint.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct OriginOptions {
    /// If false, HEAD returns 405 and clients must fall back to a `bytes=0-0` request.
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns the full object.
    pub support_ranges: bool,
}

impl Default for OriginOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
        }
    }
}

pub struct Origin {
    pub base: String,
    gets: Arc<AtomicUsize>,
}

impl Origin {
    /// Absolute URL of `path` on this origin.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// GET requests served so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

/// Serves `objects` (path without leading slash → body) until the process
/// exits.
pub fn start(objects: Vec<(&str, Vec<u8>)>) -> Origin {
    start_with_options(objects, OriginOptions::default())
}

pub fn start_with_options(objects: Vec<(&str, Vec<u8>)>, opts: OriginOptions) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let objects: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        objects
            .into_iter()
            .map(|(path, body)| (format!("/{}", path.trim_start_matches('/')), body))
            .collect(),
    );
    let gets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gets);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let objects = Arc::clone(&objects);
            let counter = Arc::clone(&counter);
            thread::spawn(move || handle(stream, &objects, opts, &counter));
        }
    });
    Origin {
        base: format!("http://127.0.0.1:{}", port),
        gets,
    }
}

fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 || raw.len() > 64 * 1024 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(raw).ok()
}

fn handle(
    mut stream: TcpStream,
    objects: &HashMap<String, Vec<u8>>,
    opts: OriginOptions,
    gets: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(head) = read_head(&mut stream) else {
        return;
    };
    let (method, path, range) = parse_request(&head);
    let Some(body) = objects.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    };
    let total = body.len() as u64;
    let accept_ranges = if opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let response = if opts.head_allowed {
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
                total, accept_ranges
            )
        } else {
            "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        };
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }
    gets.fetch_add(1, Ordering::SeqCst);

    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, _)) if start >= total => (
            "416 Range Not Satisfiable",
            Some(format!("bytes */{}", total)),
            &body[0..0],
        ),
        Some((start, end_incl)) => {
            let end_excl = end_incl.saturating_add(1).min(total);
            (
                "206 Partial Content",
                Some(format!("bytes {}-{}/{}", start, end_excl - 1, total)),
                &body[start as usize..end_excl as usize],
            )
        }
        None => ("200 OK", None, &body[..]),
    };
    let content_range = content_range
        .map(|v| format!("Content-Range: {}\r\n", v))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range,
        accept_ranges
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// Returns (method, path, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(head: &str) -> (&str, &str, Option<(u64, u64)>) {
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);
    let mut range = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = spec.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim().parse::<u64>().unwrap_or(u64::MAX);
            range = Some((start, end));
        }
    }
    (method, path, range)
}
