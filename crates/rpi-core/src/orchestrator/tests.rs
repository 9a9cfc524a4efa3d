use super::*;
use crate::installer::{InstallProgress, InstallerError};
use crate::testutil::{build_package, zip_bytes, zip_file};
use std::collections::VecDeque;

const CID_A: &str = "UP0001-CUSA00001_00-AAAAAAAAAAAAAAAA";
const CID_B: &str = "UP0001-CUSA00002_00-BBBBBBBBBBBBBBBB";

fn progress(status: InstallStatus, error_code: u32) -> InstallProgress {
    InstallProgress {
        status,
        error_code,
        bytes_total: 100,
        bytes_transferred: 50,
    }
}

/// Installer that records submissions and replays a status script.
struct Scripted {
    submitted: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<InstallProgress>>,
    after: InstallProgress,
    refuse: bool,
}

impl Scripted {
    fn new(script: Vec<InstallProgress>, after: InstallProgress) -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            after,
            refuse: false,
        })
    }

    fn playable() -> Arc<Self> {
        Self::new(
            vec![progress(InstallStatus::Running, 0)],
            progress(InstallStatus::Playable, 0),
        )
    }

    fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

impl PackageInstaller for Scripted {
    fn submit(&self, uri: &str, display_name: &str) -> Result<(), InstallerError> {
        if self.refuse {
            return Err(InstallerError::Rejected {
                uri: uri.to_string(),
                reason: "no space".to_string(),
            });
        }
        self.submitted
            .lock()
            .unwrap()
            .push((uri.to_string(), display_name.to_string()));
        Ok(())
    }

    fn poll(&self, _content_id: &str) -> Result<InstallProgress, InstallerError> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or(self.after))
    }
}

/// Installer binding that crashes on submit.
struct Panicking;

impl PackageInstaller for Panicking {
    fn submit(&self, _uri: &str, _display_name: &str) -> Result<(), InstallerError> {
        panic!("installer binding crashed");
    }

    fn poll(&self, _content_id: &str) -> Result<InstallProgress, InstallerError> {
        unreachable!("nothing was submitted")
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    registry: Arc<JobRegistry>,
    orchestrator: Arc<Orchestrator>,
}

fn fixture(installer: Arc<dyn PackageInstaller>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("remote")).unwrap();
    let config = RpiConfig {
        install_poll_interval_ms: 10,
        read_poll_interval_ms: 5,
        ..RpiConfig::default()
    };
    let registry = Arc::new(JobRegistry::new());
    let orchestrator = Orchestrator::new(
        config,
        8090,
        dir.path().join("staging"),
        Arc::clone(&registry),
        installer,
    );
    Fixture {
        dir,
        registry,
        orchestrator,
    }
}

impl Fixture {
    fn put(&self, name: &str, data: &[u8]) -> InstallTarget {
        let root = self.dir.path().join("remote");
        std::fs::write(root.join(name), data).unwrap();
        InstallTarget::local(&root, name)
    }

    fn staging_is_empty(&self) -> bool {
        let staging = self.dir.path().join("staging");
        !staging.exists() || std::fs::read_dir(staging).unwrap().next().is_none()
    }
}

#[test]
fn direct_install_completes_and_cleans_up() {
    let installer = Scripted::playable();
    let f = fixture(installer.clone());
    let target = f.put("game.pkg", &build_package(CID_A, Some("Game A"), 4096));

    let report = f.orchestrator.install(&target, InstallOptions::default()).unwrap();
    assert_eq!(report.strategy, Strategy::Direct);
    assert_eq!(
        report.installed,
        [InstalledPackage {
            content_id: CID_A.into(),
            display_name: "Game A".into()
        }]
    );
    let submitted = installer.submitted();
    assert_eq!(submitted.len(), 1);
    let hash = content_hash(&target.key);
    assert_eq!(submitted[0].0, format!("http://127.0.0.1:8090/rmt_inst/{}", hash));

    assert!(f.registry.is_empty());
    assert!(!f.orchestrator.is_busy());
    let snap = f.orchestrator.snapshot().unwrap();
    assert_eq!(snap.state, InstallState::Idle);
    assert_eq!(snap.result, Some(InstallState::Completed));
    assert_eq!(snap.installed, 1);
}

#[test]
fn disk_cache_selects_staged_and_removes_chunks() {
    let installer = Scripted::playable();
    let f = fixture(installer.clone());
    let target = f.put("game.pkg", &build_package(CID_A, None, 10_000));
    let options = InstallOptions { use_disk_cache: true };

    let report = f.orchestrator.install(&target, options).unwrap();
    assert_eq!(report.strategy, Strategy::Staged);
    assert_eq!(report.installed[0].display_name, "CUSA00001");
    assert!(installer.submitted()[0].0.contains("/split_inst/"));
    assert!(f.registry.is_empty());
    assert!(f.staging_is_empty());
}

#[test]
fn registration_failure_is_terminal() {
    let installer = Arc::new(Scripted {
        submitted: Mutex::new(Vec::new()),
        script: Mutex::new(VecDeque::new()),
        after: progress(InstallStatus::Playable, 0),
        refuse: true,
    });
    let f = fixture(installer);
    let target = f.put("game.pkg", &build_package(CID_A, None, 64));
    let err = f
        .orchestrator
        .install(&target, InstallOptions { use_disk_cache: true })
        .unwrap_err();
    assert!(matches!(err, InstallError::Registration(_)));
    assert_eq!(err.status_message(), "The installer refused the package");
    assert!(f.registry.is_empty());
    assert!(f.registry.activity().is_none());
    assert_eq!(
        f.orchestrator.snapshot().unwrap().result,
        Some(InstallState::Failed)
    );
}

#[test]
fn installer_error_code_fails_the_install() {
    let installer = Scripted::new(
        vec![progress(InstallStatus::Running, 0)],
        progress(InstallStatus::Running, 0x8099_0001),
    );
    let f = fixture(installer);
    let target = f.put("game.pkg", &build_package(CID_A, None, 64));
    let err = f.orchestrator.install(&target, InstallOptions::default()).unwrap_err();
    assert!(matches!(err, InstallError::Installer { code: 0x8099_0001 }));
    assert!(f.registry.is_empty());
}

#[test]
fn unreachable_source_registers_nothing() {
    let f = fixture(Scripted::playable());
    let target = InstallTarget::local(&f.dir.path().join("remote"), "missing.pkg");
    let err = f.orchestrator.install(&target, InstallOptions::default()).unwrap_err();
    assert!(matches!(err, InstallError::Connect(_)));
    assert!(f.registry.is_empty());
    assert!(!f.orchestrator.is_busy());
}

#[test]
fn second_session_rejected_while_polling() {
    let installer = Scripted::new(Vec::new(), progress(InstallStatus::Running, 0));
    let f = fixture(installer);
    let first = f.put("one.pkg", &build_package(CID_A, None, 64));
    let second = f.put("two.pkg", &build_package(CID_B, None, 64));

    f.orchestrator
        .install_background(first, InstallOptions::default())
        .unwrap();
    let before = f.orchestrator.snapshot().unwrap();
    assert!(matches!(
        before.state,
        InstallState::RegisteredWithInstaller | InstallState::Polling
    ));

    let err = f.orchestrator.install(&second, InstallOptions::default()).unwrap_err();
    assert!(matches!(err, InstallError::Busy(_)));
    let after = f.orchestrator.snapshot().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.target, before.target);
    assert_eq!(f.registry.len(), 1);

    assert!(f.orchestrator.cancel());
    assert!(f.orchestrator.wait_idle(Duration::from_secs(5)));
    assert_eq!(
        f.orchestrator.snapshot().unwrap().result,
        Some(InstallState::Canceled)
    );
    assert!(f.registry.is_empty());
}

#[test]
fn archive_installs_each_entry_as_its_own_job() {
    let installer = Scripted::playable();
    let f = fixture(installer.clone());
    let a = build_package(CID_A, Some("First"), 3000);
    let b = build_package(CID_B, Some("Second"), 5000);
    let target = f.put(
        "bundle.zip",
        &zip_bytes(&[
            zip_file("docs/readme.txt", b"hi"),
            zip_file("a.pkg", &a),
            zip_file("../escape.pkg", &a),
            zip_file("sub/b.pkg", &b),
        ]),
    );

    let report = f.orchestrator.install(&target, InstallOptions::default()).unwrap();
    assert_eq!(report.strategy, Strategy::Archive);
    let names: Vec<_> = report.installed.iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, ["First", "Second"]);
    let urls: Vec<_> = installer.submitted().into_iter().map(|(u, _)| u).collect();
    assert_eq!(urls.len(), 2);
    assert!(urls.iter().all(|u| u.contains("/archive_inst/")));
    assert_ne!(urls[0], urls[1]);
    assert!(f.registry.is_empty());
    assert!(f.staging_is_empty());
}

#[test]
fn archive_without_packages_is_not_installable() {
    let f = fixture(Scripted::playable());
    let target = f.put("docs.zip", &zip_bytes(&[zip_file("readme.txt", b"x")]));
    assert!(matches!(
        f.orchestrator.install(&target, InstallOptions::default()),
        Err(InstallError::NotInstallable(_))
    ));
}

#[test]
fn batch_counts_success_failure_and_skips() {
    let f = fixture(Scripted::playable());
    let targets = vec![
        f.put("a.pkg", &build_package(CID_A, None, 64)),
        f.put("notes.txt", b"plain text"),
        InstallTarget::local(&f.dir.path().join("remote"), "gone.pkg"),
        f.put("b.pkg", &build_package(CID_B, None, 64)),
    ];
    let summary = f
        .orchestrator
        .install_many(&targets, InstallOptions::default())
        .unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            succeeded: 2,
            failed: 1,
            skipped: 1
        }
    );
    assert!(!f.orchestrator.is_busy());
}

#[test]
fn cancel_without_session_is_noop() {
    let f = fixture(Scripted::playable());
    assert!(!f.orchestrator.cancel());
    assert!(f.orchestrator.wait_idle(Duration::from_millis(10)));
}

#[test]
fn panicking_worker_fails_the_background_session() {
    let f = fixture(Arc::new(Panicking));
    let target = f.put("game.pkg", &build_package(CID_A, None, 64 * 1024));
    let err = f
        .orchestrator
        .install_background(target, InstallOptions { use_disk_cache: true })
        .unwrap_err();
    assert!(matches!(err, InstallError::Stream(_)));

    assert!(f.orchestrator.wait_idle(Duration::from_secs(2)));
    assert!(!f.orchestrator.is_busy());
    assert!(f.registry.is_empty());
    assert!(f.staging_is_empty());
    let snap = f.orchestrator.snapshot().unwrap();
    assert_eq!(snap.state, InstallState::Idle);
    assert_eq!(snap.result, Some(InstallState::Failed));
    assert!(snap.error.unwrap().contains("install worker exited"));
}
