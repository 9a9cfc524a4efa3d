//! RAII guard that fails a background session whose worker unwinds.

use super::session::Session;
use super::{InstallError, Orchestrator};

/// Fails the session when dropped before the worker finished it, so a panic
/// still frees the job and the activity guard.
pub(super) struct WorkerGuard<'a> {
    pub(super) orchestrator: &'a Orchestrator,
    pub(super) session: &'a Session,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if self.session.is_finished() {
            return;
        }
        tracing::error!("install worker exited without finishing its session");
        if let Some(job) = self.session.job() {
            job.stop();
            // Detached; its chunk files go now rather than when it exits.
            drop(job.take_producer());
            if let Some(buffer) = job.buffer() {
                buffer.discard();
            }
            self.orchestrator.registry.remove_if_same(&job);
            self.session.set_job(None);
        }
        let exited = Err::<(), _>(InstallError::Stream("install worker exited".into()));
        self.orchestrator.finish(self.session, &exited);
    }
}
