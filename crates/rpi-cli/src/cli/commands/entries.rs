//! `rpi entries` – installable entries inside an archive.

use anyhow::{Context, Result};
use rpi_core::archive::ArchiveHandle;
use rpi_core::config::RpiConfig;
use rpi_core::orchestrator::InstallTarget;
use rpi_core::source::SharedSource;
use std::sync::Arc;

pub async fn run_entries(cfg: &RpiConfig, url: &str) -> Result<()> {
    let target = InstallTarget::from_url(url, cfg.retry_policy())?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        let source: SharedSource = Arc::from(target.factory.open().context("connect")?);
        let mut handle = ArchiveHandle::open(Arc::clone(&source), &target.path)?;
        let entries = handle.installable_entries()?;
        if entries.is_empty() {
            println!("No installable entries in {}.", target.label());
        } else {
            println!("{:<14} {}", "SIZE", "ENTRY");
            for entry in &entries {
                println!("{:<14} {}", entry.size, entry.name);
            }
        }
        drop(handle);
        source.disconnect();
        Ok(())
    })
    .await?
}
