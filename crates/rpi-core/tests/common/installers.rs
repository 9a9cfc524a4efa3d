//! Stand-ins for the device installer.

use super::http_client;
use rpi_core::installer::{InstallProgress, InstallStatus, InstallerError, PackageInstaller};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn bridge_target(uri: &str) -> Result<(SocketAddr, String), InstallerError> {
    let rejected = |reason: &str| InstallerError::Rejected {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };
    let parsed = url::Url::parse(uri).map_err(|e| rejected(&e.to_string()))?;
    let addr = parsed
        .socket_addrs(|| None)
        .ok()
        .and_then(|a| a.into_iter().next())
        .ok_or_else(|| rejected("no address"))?;
    Ok((addr, parsed.path().to_string()))
}

#[derive(Default)]
struct Pull {
    total: u64,
    transferred: AtomicU64,
    done: Mutex<Option<Result<Vec<u8>, u32>>>,
}

/// Pulls the submitted URL through the bridge the way the device does:
/// HEAD for the length, then sequential range GETs of `piece` bytes.
/// `first_range`, if set, is fetched before the sequential pull.
pub struct PullingInstaller {
    piece: u64,
    first_range: Option<(u64, u64)>,
    submitted: Mutex<Vec<String>>,
    first_reply: Arc<Mutex<Option<http_client::Reply>>>,
    pulls: Mutex<Vec<Arc<Pull>>>,
}

impl PullingInstaller {
    pub fn new(piece: u64) -> Arc<Self> {
        Self::with_first_range(piece, None)
    }

    pub fn with_first_range(piece: u64, first_range: Option<(u64, u64)>) -> Arc<Self> {
        Arc::new(Self {
            piece,
            first_range,
            submitted: Mutex::new(Vec::new()),
            first_reply: Arc::new(Mutex::new(None)),
            pulls: Mutex::new(Vec::new()),
        })
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    /// Bytes pulled for the `index`-th submission, once it finished.
    pub fn received(&self, index: usize) -> Option<Vec<u8>> {
        let pulls = self.pulls.lock().unwrap();
        let done = pulls.get(index)?.done.lock().unwrap();
        done.as_ref().and_then(|r| r.as_ref().ok().cloned())
    }

    pub fn take_first_reply(&self) -> Option<http_client::Reply> {
        self.first_reply.lock().unwrap().take()
    }

    fn current(&self) -> Option<Arc<Pull>> {
        self.pulls.lock().unwrap().last().cloned()
    }
}

impl PackageInstaller for PullingInstaller {
    fn submit(&self, uri: &str, _display_name: &str) -> Result<(), InstallerError> {
        let (addr, path) = bridge_target(uri)?;
        let head = http_client::request(addr, "HEAD", &path, &[], b"");
        let total: u64 = head
            .header("Content-Length")
            .and_then(|v| v.parse().ok())
            .filter(|_| head.status == 200)
            .ok_or_else(|| InstallerError::Rejected {
                uri: uri.to_string(),
                reason: format!("HEAD answered {}", head.status),
            })?;
        self.submitted.lock().unwrap().push(uri.to_string());
        let pull = Arc::new(Pull {
            total,
            ..Pull::default()
        });
        self.pulls.lock().unwrap().push(Arc::clone(&pull));

        let (piece, first_range) = (self.piece, self.first_range);
        let first_reply = Arc::clone(&self.first_reply);
        std::thread::spawn(move || {
            if let Some((start, end)) = first_range {
                let reply = http_client::get_range(addr, &path, start, end);
                *first_reply.lock().unwrap() = Some(reply);
            }
            let mut data = Vec::with_capacity(total as usize);
            let mut outcome = Ok(());
            while (data.len() as u64) < total {
                let start = data.len() as u64;
                let end = (start + piece).min(total) - 1;
                let reply = http_client::get_range(addr, &path, start, end);
                if reply.status != 206 || reply.body.is_empty() {
                    outcome = Err(u32::from(reply.status));
                    break;
                }
                data.extend_from_slice(&reply.body);
                pull.transferred.store(data.len() as u64, Ordering::SeqCst);
            }
            *pull.done.lock().unwrap() = Some(outcome.map(|()| data));
        });
        Ok(())
    }

    fn poll(&self, _content_id: &str) -> Result<InstallProgress, InstallerError> {
        let Some(pull) = self.current() else {
            return Ok(InstallProgress::none());
        };
        let (status, error_code) = match pull.done.lock().unwrap().as_ref() {
            None => (InstallStatus::Running, 0),
            Some(Ok(_)) => (InstallStatus::Playable, 0),
            Some(Err(code)) => (InstallStatus::Error, *code),
        };
        Ok(InstallProgress {
            status,
            error_code,
            bytes_total: pull.total,
            bytes_transferred: pull.transferred.load(Ordering::SeqCst),
        })
    }
}

/// Accepts every submission and reports it running forever.
#[derive(Default)]
pub struct HoldingInstaller {
    submitted: Mutex<Vec<String>>,
}

impl HoldingInstaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

impl PackageInstaller for HoldingInstaller {
    fn submit(&self, uri: &str, _display_name: &str) -> Result<(), InstallerError> {
        self.submitted.lock().unwrap().push(uri.to_string());
        Ok(())
    }

    fn poll(&self, _content_id: &str) -> Result<InstallProgress, InstallerError> {
        Ok(InstallProgress {
            status: InstallStatus::Running,
            error_code: 0,
            bytes_total: 1,
            bytes_transferred: 0,
        })
    }
}

/// Refuses the first `refusals` submissions, then defers to `inner`.
pub struct RefusingInstaller {
    refusals: AtomicU64,
    inner: Arc<dyn PackageInstaller>,
}

impl RefusingInstaller {
    pub fn new(refusals: u64, inner: Arc<dyn PackageInstaller>) -> Arc<Self> {
        Arc::new(Self {
            refusals: AtomicU64::new(refusals),
            inner,
        })
    }
}

impl PackageInstaller for RefusingInstaller {
    fn submit(&self, uri: &str, display_name: &str) -> Result<(), InstallerError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(InstallerError::Rejected {
                uri: uri.to_string(),
                reason: "no space left".to_string(),
            });
        }
        self.inner.submit(uri, display_name)
    }

    fn poll(&self, content_id: &str) -> Result<InstallProgress, InstallerError> {
        self.inner.poll(content_id)
    }
}
