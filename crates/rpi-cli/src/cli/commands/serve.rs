//! `rpi serve` – run the bridge until Ctrl-C, accepting installs over HTTP.

use anyhow::Result;
use rpi_core::config::RpiConfig;
use std::path::PathBuf;
use std::time::Duration;

use super::pipeline::Pipeline;

const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

pub async fn run_serve(cfg: RpiConfig, out: Option<PathBuf>) -> Result<()> {
    let Pipeline {
        mut bridge,
        orchestrator,
        installer,
    } = Pipeline::start(cfg, out)?;
    bridge.set_api(orchestrator.clone());

    let addr = bridge.local_addr();
    println!("Range bridge listening on http://{}", addr);
    println!("  POST /install_url {{\"url\": \"...\"}}   GET /status");
    println!("Mirroring installs into {}", installer.out_dir().display());

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    if orchestrator.cancel() {
        let waiter = orchestrator.clone();
        let idle = tokio::task::spawn_blocking(move || waiter.wait_idle(SHUTDOWN_WAIT)).await?;
        if !idle {
            tracing::warn!("install did not finish cleanup before shutdown");
        }
    }
    tokio::task::spawn_blocking(move || bridge.shutdown()).await?;
    Ok(())
}
