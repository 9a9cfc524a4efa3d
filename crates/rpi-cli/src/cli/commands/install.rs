//! `rpi install` – install one URL through a private bridge and wait.

use anyhow::{anyhow, bail, Result};
use rpi_core::config::RpiConfig;
use rpi_core::orchestrator::{InstallError, InstallOptions, InstallTarget, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::pipeline::Pipeline;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const CANCEL_WAIT: Duration = Duration::from_secs(10);

fn spawn_progress(orchestrator: Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        loop {
            tokio::time::sleep(PROGRESS_INTERVAL).await;
            let Some(snap) = orchestrator.snapshot() else {
                continue;
            };
            let line = (snap.state, snap.bytes_transferred, snap.bytes_total);
            if last == Some(line) {
                continue;
            }
            last = Some(line);
            let pct = if snap.bytes_total > 0 {
                snap.bytes_transferred as f64 * 100.0 / snap.bytes_total as f64
            } else {
                0.0
            };
            println!(
                "  {:<26} {:.1} / {:.1} MiB ({:.1}%)  {}",
                format!("{:?}", snap.state).to_lowercase(),
                snap.bytes_transferred as f64 / 1_048_576.0,
                snap.bytes_total as f64 / 1_048_576.0,
                pct,
                snap.display_name.as_deref().unwrap_or("")
            );
        }
    })
}

/// Background mode: returns from the orchestrator once the first package
/// is handed over, then watches the session until it goes idle.
async fn run_background(
    pipeline: &Pipeline,
    target: InstallTarget,
    options: InstallOptions,
) -> Result<()> {
    let orchestrator = pipeline.orchestrator.clone();
    let worker = orchestrator.clone();
    tokio::task::spawn_blocking(move || worker.install_background(target, options))
        .await?
        .map_err(|e| anyhow!("{}: {}", e.status_message(), e))?;
    println!("Handed to the installer; Ctrl-C cancels.");

    let progress = spawn_progress(orchestrator.clone());
    loop {
        tokio::select! {
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => {
                if !orchestrator.is_busy() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Canceling...");
                orchestrator.cancel();
                let waiter = orchestrator.clone();
                tokio::task::spawn_blocking(move || waiter.wait_idle(CANCEL_WAIT)).await?;
                break;
            }
        }
    }
    progress.abort();

    let Some(snap) = orchestrator.snapshot() else {
        return Ok(());
    };
    println!(
        "Finished: {} installed, {} failed ({})",
        snap.installed,
        snap.failed,
        snap.result
            .map(|r| format!("{:?}", r).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string())
    );
    match snap.error {
        Some(error) if snap.installed == 0 => bail!("{}", error),
        _ => Ok(()),
    }
}

pub async fn run_install(
    cfg: RpiConfig,
    url: &str,
    disk_cache: bool,
    background: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let target = InstallTarget::from_url(url, cfg.retry_policy())?;
    let pipeline = Pipeline::start(cfg, out)?;
    println!("Installing {} (bridge port {})", target.label(), pipeline.bridge.port());
    let options = InstallOptions {
        use_disk_cache: disk_cache,
    };
    if background {
        return run_background(&pipeline, target, options).await;
    }

    let orchestrator = pipeline.orchestrator.clone();

    let progress = spawn_progress(orchestrator.clone());
    let worker = orchestrator.clone();
    let mut install = tokio::task::spawn_blocking(move || worker.install(&target, options));
    let result = tokio::select! {
        joined = &mut install => joined?,
        _ = tokio::signal::ctrl_c() => {
            println!("Canceling...");
            orchestrator.cancel();
            install.await?
        }
    };
    progress.abort();

    match result {
        Ok(report) => {
            println!("Strategy: {:?}", report.strategy);
            for pkg in &report.installed {
                let path = pipeline.installer.output_path(&pkg.content_id);
                println!(
                    "Installed {} ({}){}",
                    pkg.display_name,
                    pkg.content_id,
                    path.map(|p| format!(" -> {}", p.display())).unwrap_or_default()
                );
            }
            for (entry, reason) in &report.failed {
                println!("Failed {}: {}", entry, reason);
            }
            Ok(())
        }
        Err(InstallError::Canceled) => {
            println!("{}", InstallError::Canceled.status_message());
            Ok(())
        }
        Err(e) => bail!("{}: {}", e.status_message(), e),
    }
}
