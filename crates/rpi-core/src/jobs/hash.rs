//! Content hash used as the bridge path segment for a job.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Stable, URL- and filename-safe key for a source URL or path: the first
/// 16 bytes of its SHA-256, base64 with `=`, `+`, `/` replaced by `a`, `b`,
/// `c`, plus a `.pkg` suffix so installers that sniff extensions accept it.
pub fn content_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut out = STANDARD.encode(&digest[..16]);
    out = out.replace('=', "a").replace('+', "b").replace('/', "c");
    out.push_str(".pkg");
    out
}
