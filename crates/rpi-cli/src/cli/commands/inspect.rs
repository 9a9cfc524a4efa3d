//! `rpi inspect` – header metadata of a remote package.

use anyhow::{Context, Result};
use rpi_core::config::RpiConfig;
use rpi_core::orchestrator::InstallTarget;
use rpi_core::package::{self, PackageHeader, RemoteObject};
use std::path::PathBuf;

pub async fn run_inspect(cfg: &RpiConfig, url: &str, extract: Option<PathBuf>) -> Result<()> {
    let target = InstallTarget::from_url(url, cfg.retry_policy())?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        let source = target.factory.open().context("connect")?;
        let object = RemoteObject {
            source: source.as_ref(),
            path: &target.path,
        };
        let header = PackageHeader::read_from(&object)?;
        let meta = package::read_metadata(&object)?;
        println!("Content ID:   {}", meta.content_id);
        println!("Title:        {}", meta.title.as_deref().unwrap_or("-"));
        println!("Display name: {}", meta.display_name());
        println!("Size:         {} bytes", meta.content_size);
        println!("Magic:        {:#010x} ({} table entries)", header.magic, header.entry_count);
        if let Some(dir) = extract {
            let assets = package::extract_assets(&object, &dir)?;
            for path in [assets.param_sfo, assets.icon0].into_iter().flatten() {
                println!("Wrote {}", path.display());
            }
        }
        source.disconnect();
        Ok(())
    })
    .await?
}
