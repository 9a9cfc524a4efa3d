use rpi_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // File logging first; fall back to stderr when the state dir is unwritable.
    if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable: {:#}", err);
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("rpi error: {:#}", err);
        std::process::exit(1);
    }
}
