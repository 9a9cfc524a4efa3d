//! Job registry and the global activity guard.
//!
//! Both live behind one service object: the bridge looks jobs up by hash,
//! the orchestrator registers and removes them, and at most one install
//! session holds the activity guard at a time.

use super::Job;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Returned when an install is attempted while another one is active.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("activity in progress: {0}")]
pub struct ActivityBusy(pub String);

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    activity: Mutex<Option<String>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `job` under its hash, replacing any previous entry (which
    /// is returned). The job is fully built before it becomes visible.
    pub fn register(&self, job: Arc<Job>) -> Option<Arc<Job>> {
        let hash = job.hash().to_string();
        let previous = self.jobs().insert(hash.clone(), job);
        if previous.is_some() {
            tracing::warn!(hash = %hash, "job replaced an existing registration");
        } else {
            tracing::debug!(hash = %hash, "job registered");
        }
        previous
    }

    pub fn lookup(&self, hash: &str) -> Option<Arc<Job>> {
        self.jobs().get(hash).cloned()
    }

    /// Removes the entry for `hash`, but only if it is still `job` (a newer
    /// registration under the same hash is left alone).
    pub fn remove_if_same(&self, job: &Arc<Job>) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(job.hash()) {
            Some(current) if Arc::ptr_eq(current, job) => {
                jobs.remove(job.hash());
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, hash: &str) -> Option<Arc<Job>> {
        self.jobs().remove(hash)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Claims the activity guard or fails immediately if it is held.
    pub fn try_begin_activity(
        self: &Arc<Self>,
        label: &str,
    ) -> Result<ActivityGuard, ActivityBusy> {
        let mut slot = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = slot.as_ref() {
            return Err(ActivityBusy(current.clone()));
        }
        *slot = Some(label.to_string());
        tracing::info!(activity = label, "activity started");
        Ok(ActivityGuard {
            registry: Arc::clone(self),
        })
    }

    /// Label of the running activity, if any.
    pub fn activity(&self) -> Option<String> {
        self.activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn end_activity(&self) {
        let previous = self
            .activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(label) = previous {
            tracing::info!(activity = %label, "activity finished");
        }
    }
}

/// Holds the global activity slot; releases it on drop.
pub struct ActivityGuard {
    registry: Arc<JobRegistry>,
}

impl std::fmt::Debug for ActivityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityGuard").finish_non_exhaustive()
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.registry.end_activity();
    }
}
