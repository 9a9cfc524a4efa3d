//! Loopback HTTP bridge the installer pulls packages from.
//!
//! `GET /<kind>/<hash>` with a single `Range` header is answered with 206 and
//! the requested span of the job's backing store. Each request runs on its
//! own thread, so a response blocked on a staging read never stalls others.

mod api;
mod body;
mod error;
mod range;
mod route;

pub use api::{ApiReply, ApiResult, InstallApi, InstallUrlRequest, StatusReply};
pub use body::{BodyReader, BufferProvider, Chunk, DirectProvider, RangeProvider};
pub use error::BridgeError;
pub use range::{parse_range, ByteRange, RangeError};
pub use route::parse_route;

use crate::jobs::{Job, JobRegistry, JobSource};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const MAX_API_BODY: u64 = 64 * 1024;

struct Shared {
    registry: Arc<JobRegistry>,
    api: Mutex<Option<Arc<dyn InstallApi>>>,
    transfer_chunk: usize,
    stop: AtomicBool,
}

impl Shared {
    fn api(&self) -> Option<Arc<dyn InstallApi>> {
        self.api.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct RangeBridge {
    addr: SocketAddr,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl RangeBridge {
    /// Binds `addr` (port 0 picks a free port) and starts serving jobs from
    /// `registry`.
    pub fn start(
        addr: SocketAddr,
        registry: Arc<JobRegistry>,
        transfer_chunk: usize,
    ) -> Result<Self, BridgeError> {
        let server = Server::http(addr).map_err(|e| BridgeError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let bound = server.server_addr().to_ip().unwrap_or(addr);
        let shared = Arc::new(Shared {
            registry,
            api: Mutex::new(None),
            transfer_chunk,
            stop: AtomicBool::new(false),
        });
        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("rpi-bridge".into())
            .spawn(move || accept_loop(server, loop_shared))?;
        tracing::info!(addr = %bound, "range bridge listening");
        Ok(Self {
            addr: bound,
            shared,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Enables `/install_url` and session details in `/status`.
    pub fn set_api(&self, api: Arc<dyn InstallApi>) {
        *self.shared.api.lock().unwrap_or_else(|e| e.into_inner()) = Some(api);
    }

    /// Stops accepting requests. Responses already in flight finish on their
    /// own threads.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        // The API backend may hold the bridge's owner alive; drop it here.
        self.shared.api.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("range bridge thread panicked");
            }
            tracing::info!(addr = %self.addr, "range bridge stopped");
        }
    }
}

impl Drop for RangeBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(server: Server, shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        let request = match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("range bridge accept failed: {}", e);
                break;
            }
        };
        let shared = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name("rpi-bridge-req".into())
            .spawn(move || handle(&shared, request));
        if let Err(e) = spawned {
            tracing::warn!("cannot spawn request thread: {}", e);
        }
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn text(code: u16, message: &str) -> Response<io::Cursor<Vec<u8>>> {
    Response::from_string(message).with_status_code(code)
}

fn json(body: String) -> Response<io::Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body);
    if let Some(h) = header("Content-Type", "application/json") {
        response = response.with_header(h);
    }
    response
}

fn handle(shared: &Shared, request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("");
    tracing::debug!(method = %method, url = %url, "bridge request");
    let result = match (&method, path) {
        (Method::Get, "/status") => respond_status(shared, request),
        (Method::Post, "/install_url") => respond_install(shared, request),
        (Method::Get | Method::Head, _) => serve_range(shared, request),
        _ => request.respond(text(405, "method not allowed")),
    };
    if let Err(e) = result {
        tracing::debug!(url = %url, "response aborted: {}", e);
    }
}

fn respond_status(shared: &Shared, request: Request) -> io::Result<()> {
    let reply = StatusReply {
        activity: shared.registry.activity(),
        jobs: shared.registry.len(),
        session: shared.api().and_then(|api| api.session()),
    };
    let body = serde_json::to_string(&reply).map_err(io::Error::other)?;
    request.respond(json(body))
}

fn respond_install(shared: &Shared, mut request: Request) -> io::Result<()> {
    let mut body = Vec::new();
    let outcome = match request.as_reader().take(MAX_API_BODY).read_to_end(&mut body) {
        Err(e) => Err(format!("cannot read request: {}", e)),
        Ok(_) => match serde_json::from_slice::<InstallUrlRequest>(&body) {
            Err(e) => Err(format!("invalid request: {}", e)),
            Ok(req) => match shared.api() {
                Some(api) => api.install_url(&req.url, req.use_disk_cache),
                None => Err("install API not available".to_string()),
            },
        },
    };
    if let Err(e) = &outcome {
        tracing::warn!("install_url refused: {}", e);
    }
    let body = serde_json::to_string(&ApiReply::from(outcome)).map_err(io::Error::other)?;
    request.respond(json(body))
}

fn lookup(shared: &Shared, url: &str) -> Option<Arc<Job>> {
    let (kind, hash) = parse_route(url)?;
    shared
        .registry
        .lookup(hash)
        .filter(|job| job.kind() == kind && !job.is_stopped())
}

fn serve_range(shared: &Shared, request: Request) -> io::Result<()> {
    let Some(job) = lookup(shared, request.url()) else {
        tracing::debug!(url = %request.url(), "no job for request");
        return request.respond(text(404, "no such job"));
    };
    let total = job.total_size();
    let base_headers = || {
        [
            header("Content-Type", "application/octet-stream"),
            header("Accept-Ranges", "bytes"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
    };

    if request.method() == &Method::Head {
        let response = Response::new(
            StatusCode(200),
            base_headers(),
            io::empty(),
            Some(total as usize),
            None,
        )
        .with_chunked_threshold(usize::MAX);
        return request.respond(response);
    }

    let range_value = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Range"))
        .map(|h| h.value.as_str().to_string());
    let Some(range_value) = range_value else {
        return request.respond(text(400, "Range header required"));
    };
    let range = match parse_range(&range_value, total) {
        Ok(r) => r,
        Err(RangeError::Malformed) => return request.respond(text(400, "malformed Range header")),
        Err(e) => {
            tracing::debug!(hash = %job.hash(), range = %range_value, "unsatisfiable range: {:?}", e);
            let mut response = text(416, "range not satisfiable");
            if let Some(h) = header("Content-Range", &format!("bytes */{}", total)) {
                response = response.with_header(h);
            }
            return request.respond(response);
        }
    };

    let provider: Box<dyn RangeProvider> = match job.source() {
        JobSource::Direct { factory, path } => {
            match DirectProvider::open(factory.as_ref(), path, range) {
                Ok(p) => Box::new(p),
                Err(e) => {
                    tracing::warn!(hash = %job.hash(), origin = %factory.describe(), "cannot open source: {}", e);
                    return request.respond(text(502, "source unavailable"));
                }
            }
        }
        JobSource::Buffer(buffer) => Box::new(BufferProvider::new(Arc::clone(buffer), range)),
    };
    job.note_request();
    tracing::debug!(hash = %job.hash(), start = range.start, len = range.len(), "serving range");

    let mut headers = base_headers();
    headers.extend(header("Content-Range", &range.content_range(total)));
    let body = BodyReader::new(provider, Arc::clone(&job), range.len(), shared.transfer_chunk);
    let response = Response::new(
        StatusCode(206),
        headers,
        body,
        Some(range.len() as usize),
        None,
    )
    .with_chunked_threshold(usize::MAX);
    request.respond(response)
}
