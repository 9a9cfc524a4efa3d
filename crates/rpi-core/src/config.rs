use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

const MIB: u64 = 1024 * 1024;

/// Retry policy parameters for ranged reads (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per ranged read (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/rpi/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpiConfig {
    /// Port of the local range bridge handed to the installer.
    pub http_port: u16,
    /// Listen on all interfaces instead of loopback only.
    pub bind_all_interfaces: bool,
    /// Directory for staging chunk files (None = XDG cache dir).
    pub staging_dir: Option<PathBuf>,
    /// Stage remote packages on disk before handing them to the installer.
    pub enable_disk_cache: bool,
    /// Chunk size for archive-entry staging buffers.
    pub archive_chunk_bytes: u64,
    /// Pull size used by producers and by the bridge body provider.
    pub transfer_chunk_bytes: usize,
    /// Interval between installer status queries.
    pub install_poll_interval_ms: u64,
    /// Bounded wait used by staging readers before re-checking the cursor.
    pub read_poll_interval_ms: u64,
    /// Optional retry policy for HTTP ranged reads; if missing, built-in defaults are used.
    pub retry: Option<RetryConfig>,
}

impl Default for RpiConfig {
    fn default() -> Self {
        Self {
            http_port: 8090,
            bind_all_interfaces: false,
            staging_dir: None,
            enable_disk_cache: false,
            archive_chunk_bytes: 512 * MIB,
            transfer_chunk_bytes: MIB as usize,
            install_poll_interval_ms: 500,
            read_poll_interval_ms: 100,
            retry: None,
        }
    }
}

impl RpiConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.bind_all_interfaces {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        SocketAddr::new(ip, self.http_port)
    }

    pub fn install_poll_interval(&self) -> Duration {
        Duration::from_millis(self.install_poll_interval_ms.max(1))
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().to_policy()
    }

    /// Chunk size for a STAGED buffer: half the object, bounded to
    /// `[1 MiB, archive_chunk_bytes / 2]`.
    pub fn staged_chunk_bytes(&self, expected_size: u64) -> u64 {
        let max = (self.archive_chunk_bytes / 2).max(MIB);
        (expected_size / 2).clamp(MIB, max)
    }

    /// Staging directory from config, or `$XDG_CACHE_HOME/rpi/staging`.
    pub fn resolve_staging_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.staging_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("rpi")?;
        Ok(xdg_dirs.get_cache_home().join("staging"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rpi")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RpiConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RpiConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: RpiConfig = toml::from_str(&data)?;
    Ok(cfg)
}
