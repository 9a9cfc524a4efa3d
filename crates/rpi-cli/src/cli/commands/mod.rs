//! CLI command handlers, one per file.

mod entries;
mod hash;
mod inspect;
mod install;
mod pipeline;
mod serve;

pub use entries::run_entries;
pub use hash::run_hash;
pub use inspect::run_inspect;
pub use install::run_install;
pub use serve::run_serve;
