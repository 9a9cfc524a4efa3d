//! Install session state shared between the caller, the polling thread and
//! `/status`.

use super::Strategy;
use crate::installer::InstallProgress;
use crate::jobs::{ActivityGuard, Job};
use crate::source::SharedSource;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Idle,
    Resolving,
    StrategySelected,
    Direct,
    Staged,
    Archive,
    RegisteredWithInstaller,
    Polling,
    Completed,
    Failed,
    Canceled,
    Cleanup,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: u64,
    pub target: String,
    pub state: InstallState,
    pub strategy: Option<Strategy>,
    pub job_hash: Option<String>,
    pub display_name: Option<String>,
    pub content_id: Option<String>,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
    /// Packages finished so far (archives and batches install several).
    pub installed: u32,
    pub failed: u32,
    /// Terminal state once the session is over.
    pub result: Option<InstallState>,
    pub error: Option<String>,
}

pub(crate) struct Session {
    snapshot: Mutex<SessionSnapshot>,
    canceled: Mutex<bool>,
    wake: Condvar,
    job: Mutex<Option<Arc<Job>>>,
    source: Mutex<Option<SharedSource>>,
    guard: Mutex<Option<ActivityGuard>>,
}

impl Session {
    pub(crate) fn new(id: u64, target: &str, guard: ActivityGuard) -> Self {
        Self {
            snapshot: Mutex::new(SessionSnapshot {
                id,
                target: target.to_string(),
                state: InstallState::Idle,
                strategy: None,
                job_hash: None,
                display_name: None,
                content_id: None,
                bytes_total: 0,
                bytes_transferred: 0,
                installed: 0,
                failed: 0,
                result: None,
                error: None,
            }),
            canceled: Mutex::new(false),
            wake: Condvar::new(),
            job: Mutex::new(None),
            source: Mutex::new(None),
            guard: Mutex::new(Some(guard)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        self.state().clone()
    }

    pub(crate) fn set_state(&self, state: InstallState) {
        let mut snap = self.state();
        if snap.state != state {
            tracing::info!(session = snap.id, from = ?snap.state, to = ?state, "install state");
            snap.state = state;
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        f(&mut self.state());
    }

    pub(crate) fn record_progress(&self, progress: &InstallProgress) {
        let mut snap = self.state();
        snap.bytes_total = progress.bytes_total;
        snap.bytes_transferred = progress.bytes_transferred;
    }

    pub(crate) fn set_source(&self, source: SharedSource) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(source);
    }

    /// Disconnects the resolving source, once.
    pub(crate) fn release_source(&self) {
        if let Some(source) = self.source.lock().unwrap_or_else(|e| e.into_inner()).take() {
            source.disconnect();
        }
    }

    /// Disconnects the source but keeps it, so a producer stuck in a remote
    /// read fails while later steps can still see which source was used.
    pub(crate) fn abort_source(&self) {
        if let Some(source) = self.source.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            source.disconnect();
        }
    }

    pub(crate) fn set_job(&self, job: Option<Arc<Job>>) {
        *self.job.lock().unwrap_or_else(|e| e.into_inner()) = job;
    }

    pub(crate) fn job(&self) -> Option<Arc<Job>> {
        self.job.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn is_canceled(&self) -> bool {
        *self.canceled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raises the cancel flag, stops the current job and aborts the source
    /// so a producer blocked in a remote read gives up.
    pub(crate) fn cancel(&self) {
        *self.canceled.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wake.notify_all();
        if let Some(job) = self.job.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            job.stop();
        }
        self.abort_source();
    }

    /// Sleeps for `interval` unless canceled first. Returns true if canceled.
    pub(crate) fn wait_canceled(&self, interval: Duration) -> bool {
        let canceled = self.canceled.lock().unwrap_or_else(|e| e.into_inner());
        let (canceled, _) = self
            .wake
            .wait_timeout_while(canceled, interval, |c| !*c)
            .unwrap_or_else(|e| e.into_inner());
        *canceled
    }

    /// Records the terminal state, goes idle and releases the activity guard.
    pub(crate) fn finish(&self, result: InstallState, error: Option<String>) {
        {
            let mut snap = self.state();
            snap.result = Some(result);
            if error.is_some() {
                snap.error = error;
            }
        }
        self.set_state(InstallState::Idle);
        self.guard.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.wake.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.guard.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}
