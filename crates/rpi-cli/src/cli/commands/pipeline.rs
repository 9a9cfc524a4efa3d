//! Bridge + orchestrator + mirror installer, as `serve` and `install` run them.

use anyhow::{Context, Result};
use rpi_core::bridge::RangeBridge;
use rpi_core::config::RpiConfig;
use rpi_core::installer::MirrorInstaller;
use rpi_core::jobs::JobRegistry;
use rpi_core::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Pipeline {
    pub bridge: RangeBridge,
    pub orchestrator: Arc<Orchestrator>,
    pub installer: Arc<MirrorInstaller>,
}

impl Pipeline {
    pub fn start(cfg: RpiConfig, out: Option<PathBuf>) -> Result<Self> {
        let out_dir = match out {
            Some(dir) => dir,
            None => std::env::current_dir()?.join("installed"),
        };
        let staging_dir = cfg.resolve_staging_dir()?;
        let registry = Arc::new(JobRegistry::new());
        let bridge = RangeBridge::start(cfg.bind_addr(), Arc::clone(&registry), cfg.transfer_chunk_bytes)
            .with_context(|| format!("start range bridge on {}", cfg.bind_addr()))?;
        let installer = Arc::new(MirrorInstaller::new(out_dir, cfg.retry_policy()));
        let orchestrator = Orchestrator::new(
            cfg,
            bridge.port(),
            staging_dir,
            registry,
            installer.clone(),
        );
        Ok(Self {
            bridge,
            orchestrator,
            installer,
        })
    }
}
