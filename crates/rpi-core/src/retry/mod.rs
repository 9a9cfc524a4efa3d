//! Retries for remote reads: classify the error, then let the policy
//! decide whether and how long to back off.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_status};
pub use policy::{Failure, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
