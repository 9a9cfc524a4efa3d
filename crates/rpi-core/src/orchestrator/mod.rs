//! Install orchestration.
//!
//! One session at a time (the registry's activity guard): resolve the
//! source, pick a strategy, build and register the job, hand its bridge URL
//! to the installer, poll until a terminal status, then clean up (stop the
//! producer, close and drop the buffer, unregister the job, release the
//! guard). Archives run that cycle once per installable entry.

mod error;
mod guard;
mod producer;
mod session;
mod strategy;
mod target;

pub use error::InstallError;
pub use session::{InstallState, SessionSnapshot};
pub use strategy::{select_strategy, sniff, ContentKind, Strategy};
pub use target::InstallTarget;

use crate::archive::{ArchiveEntry, ArchiveHandle};
use crate::bridge::InstallApi;
use crate::config::RpiConfig;
use crate::installer::{InstallStatus, PackageInstaller};
use crate::jobs::{content_hash, Job, JobRegistry, JobSource, ProducerHandle};
use crate::package::{self, PackageMetadata, RemoteObject};
use crate::source::{SharedSource, SourceError};
use crate::staging::StagingBuffer;
use serde::Serialize;
use guard::WorkerGuard;
use session::Session;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// How long cleanup waits for a producer after disconnecting its source.
const PRODUCER_GRACE: Duration = Duration::from_secs(5);
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Stage packages on disk instead of passing reads through.
    pub use_disk_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub content_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub strategy: Strategy,
    pub installed: Vec<InstalledPackage>,
    /// Archive entries that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

type Started = Option<mpsc::Sender<Result<(), InstallError>>>;

pub struct Orchestrator {
    config: RpiConfig,
    port: u16,
    staging_dir: PathBuf,
    registry: Arc<JobRegistry>,
    installer: Arc<dyn PackageInstaller>,
    current: Mutex<Option<Arc<Session>>>,
    next_id: AtomicU64,
    this: Weak<Orchestrator>,
}

impl Orchestrator {
    /// `port` is the bridge port that job URLs point at.
    pub fn new(
        config: RpiConfig,
        port: u16,
        staging_dir: PathBuf,
        registry: Arc<JobRegistry>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            port,
            staging_dir,
            registry,
            installer,
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The active session, or the last one once it has finished.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.current().map(|s| s.snapshot())
    }

    pub fn is_busy(&self) -> bool {
        self.registry.activity().is_some()
    }

    /// Cancels the active session. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.current() {
            Some(session) if !session.is_finished() => {
                tracing::info!("install cancel requested");
                session.cancel();
                true
            }
            _ => false,
        }
    }

    /// Blocks until no session is active, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.current() {
                Some(session) if !session.is_finished() => {}
                _ => return true,
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(JOIN_POLL);
        }
    }

    fn begin(&self, label: &str) -> Result<Arc<Session>, InstallError> {
        let guard = self.registry.try_begin_activity(label)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(Session::new(id, label, guard));
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&session));
        Ok(session)
    }

    fn finish<T>(&self, session: &Session, result: &Result<T, InstallError>) {
        session.release_source();
        let (state, error) = match result {
            Ok(_) => (InstallState::Completed, None),
            Err(InstallError::Canceled) => (InstallState::Canceled, None),
            Err(e) => (InstallState::Failed, Some(e.to_string())),
        };
        session.finish(state, error);
    }

    /// Foreground install: blocks until the installer reports a terminal
    /// status and cleanup has run.
    pub fn install(
        &self,
        target: &InstallTarget,
        options: InstallOptions,
    ) -> Result<InstallReport, InstallError> {
        let session = self.begin(&target.key)?;
        let result = self.run_target(&session, target, options, &mut None);
        self.finish(&session, &result);
        result
    }

    /// Background install: returns once the first package has been handed
    /// to the installer (or the attempt failed); polling, cleanup and any
    /// further archive entries continue on a detached thread.
    pub fn install_background(
        &self,
        target: InstallTarget,
        options: InstallOptions,
    ) -> Result<(), InstallError> {
        let this = self.this.upgrade().ok_or(InstallError::Canceled)?;
        let session = self.begin(&target.key)?;
        let (tx, rx) = mpsc::channel();
        let worker_session = Arc::clone(&session);
        let spawned = std::thread::Builder::new()
            .name("rpi-install".into())
            .spawn(move || {
                let _guard = WorkerGuard {
                    orchestrator: &this,
                    session: &worker_session,
                };
                let mut started = Some(tx);
                let result = this.run_target(&worker_session, &target, options, &mut started);
                this.finish(&worker_session, &result);
                match result {
                    Ok(report) => tracing::info!(
                        target = %target.key,
                        installed = report.installed.len(),
                        failed = report.failed.len(),
                        "background install finished"
                    ),
                    Err(e) => match started.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(e));
                        }
                        None => tracing::warn!(target = %target.key, "background install failed: {}", e),
                    },
                }
            });
        if let Err(e) = spawned {
            let err = InstallError::Stream(format!("cannot start install thread: {}", e));
            self.finish(&session, &Err::<(), _>(InstallError::Stream(e.to_string())));
            return Err(err);
        }
        rx.recv().unwrap_or_else(|_| {
            Err(InstallError::Stream(
                "install worker exited before handing over".into(),
            ))
        })
    }

    /// Installs `targets` one after another under a single session.
    /// Items that are not installable count as skipped, as does everything
    /// left when the batch is canceled.
    pub fn install_many(
        &self,
        targets: &[InstallTarget],
        options: InstallOptions,
    ) -> Result<BatchSummary, InstallError> {
        let session = self.begin(&format!("{} items", targets.len()))?;
        let mut summary = BatchSummary::default();
        for (i, target) in targets.iter().enumerate() {
            if session.is_canceled() {
                summary.skipped += (targets.len() - i) as u32;
                break;
            }
            session.update(|s| s.target = target.key.clone());
            let result = self.run_target(&session, target, options, &mut None);
            session.release_source();
            match result {
                Ok(report) => {
                    summary.succeeded += report.installed.len() as u32;
                    summary.failed += report.failed.len() as u32;
                }
                Err(InstallError::NotInstallable(reason)) => {
                    tracing::info!(target = %target.key, "skipped: {}", reason);
                    summary.skipped += 1;
                }
                Err(InstallError::Canceled) => {
                    summary.skipped += (targets.len() - i) as u32;
                    break;
                }
                Err(e) => {
                    tracing::warn!(target = %target.key, "install failed: {}", e);
                    summary.failed += 1;
                }
            }
        }
        let state = if session.is_canceled() {
            InstallState::Canceled
        } else {
            InstallState::Completed
        };
        session.finish(state, None);
        tracing::info!(?summary, "batch install finished");
        Ok(summary)
    }

    fn run_target(
        &self,
        session: &Session,
        target: &InstallTarget,
        options: InstallOptions,
        started: &mut Started,
    ) -> Result<InstallReport, InstallError> {
        session.set_state(InstallState::Resolving);
        // A cancel aborts the source, so resolve errors after it are not
        // connectivity failures.
        let resolve_error = |e: SourceError| {
            if session.is_canceled() {
                InstallError::Canceled
            } else {
                InstallError::Connect(e)
            }
        };
        let source: SharedSource = Arc::from(target.factory.open().map_err(resolve_error)?);
        session.set_source(Arc::clone(&source));
        if session.is_canceled() {
            return Err(InstallError::Canceled);
        }
        let size = source.size(&target.path).map_err(resolve_error)?;
        if session.is_canceled() {
            return Err(InstallError::Canceled);
        }
        let content = sniff(source.as_ref(), &target.path, size);
        let disk_cache = options.use_disk_cache || self.config.enable_disk_cache;
        let strategy = select_strategy(content, disk_cache, source.actions())?;
        session.update(|s| {
            s.strategy = Some(strategy);
            s.bytes_total = size;
            s.bytes_transferred = 0;
        });
        session.set_state(InstallState::StrategySelected);
        tracing::info!(target = %target.key, ?strategy, size, "strategy selected");

        let mut report = InstallReport {
            strategy,
            installed: Vec::new(),
            failed: Vec::new(),
        };
        let hash = content_hash(&target.key);
        match strategy {
            Strategy::Direct => {
                session.set_state(InstallState::Direct);
                let meta = package::read_metadata(&RemoteObject {
                    source: source.as_ref(),
                    path: &target.path,
                })?;
                let job = Arc::new(Job::new(
                    hash,
                    strategy.job_kind(),
                    JobSource::Direct {
                        factory: Arc::clone(&target.factory),
                        path: target.path.clone(),
                    },
                    size,
                    target.label(),
                ));
                let (result, _) = self.drive(session, &job, || Ok(meta), started);
                report.installed.push(result?);
            }
            Strategy::Staged => {
                session.set_state(InstallState::Staged);
                let buffer = Arc::new(StagingBuffer::open(
                    &self.staging_dir,
                    &hash,
                    self.config.staged_chunk_bytes(size),
                    self.config.read_poll_interval(),
                )?);
                buffer.set_expected_size(size);
                let job = Arc::new(Job::new(
                    hash,
                    strategy.job_kind(),
                    JobSource::Buffer(Arc::clone(&buffer)),
                    size,
                    target.label(),
                ));
                let producer = producer::spawn_download(
                    Arc::clone(&job),
                    Arc::clone(&source),
                    target.path.clone(),
                )
                .map_err(|e| InstallError::Stream(e.to_string()))?;
                job.attach_producer(producer);
                let (result, _) =
                    self.drive(session, &job, || staged_metadata(&buffer, &job), started);
                report.installed.push(result?);
            }
            Strategy::Archive => self.install_archive(session, target, source, &mut report, started)?,
        }
        Ok(report)
    }

    fn install_archive(
        &self,
        session: &Session,
        target: &InstallTarget,
        source: SharedSource,
        report: &mut InstallReport,
        started: &mut Started,
    ) -> Result<(), InstallError> {
        session.set_state(InstallState::Archive);
        let mut handle = ArchiveHandle::open(source, &target.path)?;
        let mut entry = handle.first_installable_entry()?.ok_or_else(|| {
            InstallError::NotInstallable(format!("{} has no installable entries", target.label()))
        })?;
        let mut first_error = None;
        let mut attempted = 0;
        loop {
            attempted += 1;
            tracing::info!(archive = %target.label(), entry = %entry.name, size = entry.size, "installing archive entry");
            let hash = content_hash(&format!("{}#{}", target.key, entry.name));
            let buffer = Arc::new(StagingBuffer::open(
                &self.staging_dir,
                &hash,
                self.config.archive_chunk_bytes,
                self.config.read_poll_interval(),
            )?);
            buffer.set_expected_size(entry.size);
            let job = Arc::new(Job::new(
                hash,
                Strategy::Archive.job_kind(),
                JobSource::Buffer(Arc::clone(&buffer)),
                entry.size,
                entry.name.clone(),
            ));
            let producer =
                producer::spawn_entry(Arc::clone(&job), handle, self.config.transfer_chunk_bytes)
                    .map_err(|e| InstallError::Stream(e.to_string()))?;
            job.attach_producer(producer);
            let (result, returned) =
                self.drive(session, &job, || staged_metadata(&buffer, &job), started);
            match result {
                Ok(package) => report.installed.push(package),
                Err(InstallError::Canceled) => return Err(InstallError::Canceled),
                Err(e) => {
                    tracing::warn!(entry = %entry.name, "archive entry failed: {}", e);
                    report.failed.push((entry.name.clone(), e.to_string()));
                    first_error.get_or_insert(e);
                }
            }
            if session.is_canceled() {
                return Err(InstallError::Canceled);
            }
            let advanced = match returned {
                Some(mut next) => next
                    .next_installable_entry()
                    .map(|found| (next, found))
                    .map_err(InstallError::from),
                None => {
                    tracing::info!(archive = %target.label(), "archive decoder was not returned; reopening");
                    self.resume_archive(session, target, attempted)
                }
            };
            match advanced {
                Ok((next, Some(next_entry))) => {
                    handle = next;
                    entry = next_entry;
                }
                Ok((_, None)) => break,
                Err(InstallError::Canceled) => return Err(InstallError::Canceled),
                Err(e) => {
                    tracing::warn!(archive = %target.label(), after = %entry.name, "archive cut short: {}", e);
                    report
                        .failed
                        .push((format!("{} (entries after {})", target.label(), entry.name), e.to_string()));
                    first_error.get_or_insert(e);
                    break;
                }
            }
            session.set_state(InstallState::Archive);
        }
        match first_error {
            Some(e) if report.installed.is_empty() => Err(e),
            _ => Ok(()),
        }
    }

    /// Reopens the archive on a fresh connection, skipping the `done`
    /// installable entries already handled. Returns the handle with the next
    /// entry selected, if any is left.
    fn resume_archive(
        &self,
        session: &Session,
        target: &InstallTarget,
        done: usize,
    ) -> Result<(ArchiveHandle, Option<ArchiveEntry>), InstallError> {
        let source: SharedSource = Arc::from(target.factory.open().map_err(InstallError::Connect)?);
        session.release_source();
        session.set_source(Arc::clone(&source));
        if session.is_canceled() {
            return Err(InstallError::Canceled);
        }
        let mut handle = ArchiveHandle::open(source, &target.path)?;
        let mut entry = handle.first_installable_entry()?;
        for _ in 0..done {
            if entry.is_none() {
                break;
            }
            entry = handle.next_installable_entry()?;
        }
        Ok((handle, entry))
    }

    /// Registers `job`, submits it, polls to a terminal status and cleans
    /// up. Returns the producer's archive handle if it handed one back.
    fn drive(
        &self,
        session: &Session,
        job: &Arc<Job>,
        metadata: impl FnOnce() -> Result<PackageMetadata, InstallError>,
        started: &mut Started,
    ) -> (Result<InstalledPackage, InstallError>, Option<ArchiveHandle>) {
        self.registry.register(Arc::clone(job));
        session.set_job(Some(Arc::clone(job)));
        session.update(|s| s.job_hash = Some(job.hash().to_string()));
        let result = self.submit_and_poll(session, job, metadata, started);
        let terminal = match &result {
            Ok(_) => InstallState::Completed,
            Err(InstallError::Canceled) => InstallState::Canceled,
            Err(_) => InstallState::Failed,
        };
        session.set_state(terminal);
        session.update(|s| match terminal {
            InstallState::Completed => s.installed += 1,
            InstallState::Failed => s.failed += 1,
            _ => {}
        });
        let handle = self.cleanup(session, job);
        (result, handle)
    }

    fn submit_and_poll(
        &self,
        session: &Session,
        job: &Arc<Job>,
        metadata: impl FnOnce() -> Result<PackageMetadata, InstallError>,
        started: &mut Started,
    ) -> Result<InstalledPackage, InstallError> {
        let meta = match metadata() {
            Ok(meta) => meta,
            Err(_) if session.is_canceled() => return Err(InstallError::Canceled),
            Err(e) => return Err(e),
        };
        let display_name = meta.display_name();
        session.update(|s| {
            s.display_name = Some(display_name.clone());
            s.content_id = Some(meta.content_id.clone());
        });
        if session.is_canceled() {
            return Err(InstallError::Canceled);
        }

        let url = job.local_url(self.port);
        tracing::info!(url = %url, name = %display_name, "submitting to installer");
        self.installer
            .submit(&url, &display_name)
            .map_err(InstallError::Registration)?;
        session.set_state(InstallState::RegisteredWithInstaller);
        if let Some(tx) = started.take() {
            let _ = tx.send(Ok(()));
        }

        session.set_state(InstallState::Polling);
        self.poll(session, job, &meta.content_id)?;
        Ok(InstalledPackage {
            content_id: meta.content_id,
            display_name,
        })
    }

    fn poll(&self, session: &Session, job: &Job, content_id: &str) -> Result<(), InstallError> {
        let interval = self.config.install_poll_interval();
        loop {
            if session.is_canceled() {
                return Err(InstallError::Canceled);
            }
            if let Some(reason) = job.error() {
                return Err(InstallError::Stream(reason));
            }
            let progress = self
                .installer
                .poll(content_id)
                .map_err(InstallError::Poll)?;
            session.record_progress(&progress);
            tracing::debug!(
                content_id,
                status = ?progress.status,
                transferred = progress.bytes_transferred,
                total = progress.bytes_total,
                "install progress"
            );
            if progress.error_code != 0 || progress.status == InstallStatus::Error {
                return Err(InstallError::Installer {
                    code: progress.error_code,
                });
            }
            if progress.status.is_terminal() {
                return Ok(());
            }
            if session.wait_canceled(interval) {
                return Err(InstallError::Canceled);
            }
        }
    }

    fn cleanup(&self, session: &Session, job: &Arc<Job>) -> Option<ArchiveHandle> {
        session.set_state(InstallState::Cleanup);
        job.stop();
        let handle = job
            .take_producer()
            .and_then(|producer| self.stop_producer(session, job, producer));
        if !self.registry.remove_if_same(job) {
            tracing::debug!(hash = %job.hash(), "job was already replaced");
        }
        session.set_job(None);
        tracing::debug!(
            hash = %job.hash(),
            requests = job.requests(),
            served = job.bytes_served(),
            "job cleaned up"
        );
        handle
    }

    /// Waits one poll interval for the producer to see its stop flag. One
    /// still running is blocked in a remote read: its source is disconnected
    /// and it gets `PRODUCER_GRACE` more. Past that it is detached and its
    /// chunk files are deleted under it.
    fn stop_producer(
        &self,
        session: &Session,
        job: &Job,
        producer: ProducerHandle,
    ) -> Option<ArchiveHandle> {
        let hash = job.hash();
        let producer = match join_within(producer, self.config.install_poll_interval(), hash) {
            Ok(handle) => return handle,
            Err(running) => running,
        };
        // A canceled session already disconnected its source.
        let producer = if session.is_canceled() {
            producer
        } else {
            tracing::info!(hash, "producer still running after stop; disconnecting source");
            session.abort_source();
            match join_within(producer, PRODUCER_GRACE, hash) {
                // Any decoder it hands back reads through the dead source.
                Ok(_) => return None,
                Err(running) => running,
            }
        };
        tracing::warn!(hash, "producer did not stop in time; detaching");
        drop(producer);
        if let Some(buffer) = job.buffer() {
            buffer.discard();
        }
        None
    }
}

fn staged_metadata(buffer: &StagingBuffer, job: &Job) -> Result<PackageMetadata, InstallError> {
    package::read_metadata(buffer).map_err(|e| match job.error() {
        Some(reason) => InstallError::Stream(reason),
        None => InstallError::Metadata(e),
    })
}

/// Joins `producer` if it finishes within `deadline`, else hands it back.
fn join_within(
    producer: ProducerHandle,
    deadline: Duration,
    hash: &str,
) -> Result<Option<ArchiveHandle>, ProducerHandle> {
    let start = Instant::now();
    while !producer.is_finished() {
        if start.elapsed() >= deadline {
            return Err(producer);
        }
        std::thread::sleep(JOIN_POLL);
    }
    match producer.join() {
        Ok(handle) => Ok(handle),
        Err(_) => {
            tracing::warn!(hash, "producer thread panicked");
            Ok(None)
        }
    }
}

impl InstallApi for Orchestrator {
    fn install_url(&self, url: &str, use_disk_cache: bool) -> Result<(), String> {
        let target = InstallTarget::from_url(url, self.config.retry_policy()).map_err(|e| e.to_string())?;
        self.install_background(target, InstallOptions { use_disk_cache })
            .map_err(|e| e.to_string())
    }

    fn session(&self) -> Option<SessionSnapshot> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
