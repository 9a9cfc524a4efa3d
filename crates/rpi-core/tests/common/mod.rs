//! Helpers shared by the integration tests. Each test binary uses a subset.
#![allow(dead_code)]

pub mod fixtures;
pub mod http_client;
pub mod installers;
pub mod range_server;
pub mod throttled;

use rpi_core::config::RpiConfig;
use std::time::{Duration, Instant};

/// Config with short intervals so tests do not wait on defaults.
pub fn fast_config() -> RpiConfig {
    RpiConfig {
        install_poll_interval_ms: 20,
        read_poll_interval_ms: 5,
        transfer_chunk_bytes: 64 * 1024,
        ..RpiConfig::default()
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// True when `dir` is missing or has no entries.
pub fn dir_is_empty(dir: &std::path::Path) -> bool {
    !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
}
