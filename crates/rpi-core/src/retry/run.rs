//! Retry loop around a single source operation.

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::source::SourceError;

/// Runs `op` until it succeeds or the policy gives up, sleeping between
/// attempts. Returns the last error.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Result<T, SourceError>,
{
    let mut attempt = 1u32;
    loop {
        let err = match op() {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        let failure = classify(&err);
        let RetryDecision::RetryAfter(delay) = policy.decide(attempt, failure) else {
            return Err(err);
        };
        tracing::debug!(attempt, ?failure, delay_ms = delay.as_millis() as u64, "retrying: {}", err);
        std::thread::sleep(delay);
        attempt += 1;
    }
}
