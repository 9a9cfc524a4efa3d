pub mod config;
pub mod logging;

pub mod archive;
pub mod bridge;
pub mod installer;
pub(crate) mod io_ext;
pub mod jobs;
pub mod orchestrator;
pub mod package;
pub mod retry;
pub mod source;
pub mod staging;

#[cfg(test)]
mod testutil;
