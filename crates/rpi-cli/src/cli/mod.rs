//! CLI for RPI, the remote package install bridge.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rpi_core::config;
use std::path::PathBuf;

use commands::{run_entries, run_hash, run_inspect, run_install, run_serve};

/// Top-level CLI for RPI.
#[derive(Debug, Parser)]
#[command(name = "rpi")]
#[command(about = "RPI: stream remote packages to an installer over a local range bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the range bridge with the /install_url and /status endpoints.
    Serve {
        /// Bridge port (overrides http_port from the config).
        #[arg(long)]
        port: Option<u16>,
        /// Listen on all interfaces instead of loopback.
        #[arg(long)]
        bind_all: bool,
        /// Directory the mirror installer writes packages to.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Install one package or archive and wait for the installer to finish.
    Install {
        /// http(s):// or file:// URL of a package or archive.
        url: String,
        /// Stage the package on disk while it installs.
        #[arg(long)]
        disk_cache: bool,
        /// Return from the orchestrator after the first hand-over and
        /// follow the install from the session snapshot.
        #[arg(long)]
        background: bool,
        /// Directory the mirror installer writes packages to.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Bridge port (0 picks a free one).
        #[arg(long, default_value = "0")]
        port: u16,
    },

    /// Print a remote package's header metadata.
    Inspect {
        url: String,
        /// Also write param.sfo and icon0.png into this directory.
        #[arg(long, value_name = "DIR")]
        extract: Option<PathBuf>,
    },

    /// List the installable entries of a remote archive.
    Entries { url: String },

    /// Print the content hash and bridge paths for a URL.
    Hash { url: String },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Serve {
                port,
                bind_all,
                out,
            } => {
                let mut cfg = cfg;
                if let Some(port) = port {
                    cfg.http_port = port;
                }
                cfg.bind_all_interfaces |= bind_all;
                run_serve(cfg, out).await?;
            }
            CliCommand::Install {
                url,
                disk_cache,
                background,
                out,
                port,
            } => {
                let mut cfg = cfg;
                cfg.http_port = port;
                run_install(cfg, &url, disk_cache, background, out).await?;
            }
            CliCommand::Inspect { url, extract } => run_inspect(&cfg, &url, extract).await?,
            CliCommand::Entries { url } => run_entries(&cfg, &url).await?,
            CliCommand::Hash { url } => run_hash(&url),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
