//! `rpi hash` – content hash and bridge routes for a URL.

use rpi_core::jobs::{content_hash, JobKind};

pub fn run_hash(url: &str) {
    let hash = content_hash(url);
    println!("{}", hash);
    for kind in [JobKind::Direct, JobKind::Staged, JobKind::Archive] {
        println!("  /{}/{}", kind.path_segment(), hash);
    }
}
