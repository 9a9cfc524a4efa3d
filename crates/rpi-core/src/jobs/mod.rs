//! Active streaming jobs, addressed by content hash.

mod hash;
mod job;
mod registry;

pub use hash::content_hash;
pub use job::{Job, JobKind, JobSource, ProducerHandle};
pub use registry::{ActivityBusy, ActivityGuard, JobRegistry};
