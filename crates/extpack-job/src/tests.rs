use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use extpack_core::{
    CoreExtension, Extension, ExtensionArtifact, ExtensionDependency, ExtensionError, ExtensionId,
    RepositoryId,
};
use extpack_repository::{CoreRepository, MemoryRepository, RepositoryChain};
use extpack_security::sha256_hex;
use extpack_store::{LocalExtensionStore, StoreLayout};
use semver::{Version, VersionReq};

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);
const WAIT: Duration = Duration::from_secs(10);

fn id(id: &str, version: &str) -> ExtensionId {
    ExtensionId::new(id, Version::parse(version).expect("valid version"))
}

fn extension(extension_id: &str, version: &str) -> Extension {
    Extension::new(id(extension_id, version), "file", RepositoryId::remote("main"))
}

fn requires(extension: Extension, dependency_id: &str, req: &str) -> Extension {
    extension.with_dependency(ExtensionDependency::new(
        dependency_id,
        VersionReq::parse(req).expect("valid req"),
    ))
}

fn request(path: &str, targets: Vec<ExtensionId>) -> Request {
    Request::new(
        path.split('/').map(ToOwned::to_owned).collect(),
        targets,
    )
}

struct Fixture {
    root: PathBuf,
    remote: Arc<MemoryRepository>,
    engine: JobEngine,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|_| {}, EngineConfig::default())
    }

    fn with(register: impl FnOnce(&mut HandlerRegistry), config: EngineConfig) -> Self {
        let root = test_root();
        let layout = StoreLayout::new(&root);
        let store =
            Arc::new(LocalExtensionStore::open(layout.clone()).expect("must open store"));
        let remote = Arc::new(MemoryRepository::new("main"));
        let chain = Arc::new(RepositoryChain::new());
        chain.add_repository(remote.clone());
        let core = Arc::new(CoreRepository::new([CoreExtension::new(extension(
            "platform", "14.0.0",
        ))]));
        let mut handlers = HandlerRegistry::with_defaults(layout);
        register(&mut handlers);

        let engine = JobEngine::new(
            EngineContext {
                core,
                store,
                chain,
                handlers,
            },
            config,
        );
        Self {
            root,
            remote,
            engine,
        }
    }

    fn store(&self) -> &LocalExtensionStore {
        &self.engine.context().store
    }

    fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.root)
    }

    fn run(&self, kind: JobKind, request: Request) -> Job {
        let job = self.engine.submit(kind, request).expect("must submit job");
        job.wait_timeout(WAIT).expect("job must finish in time").ok();
        job
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.engine.shutdown();
        let _ = fs::remove_dir_all(&self.root);
    }
}

/// Handler that blocks each install until the test releases it.
struct GatedHandler {
    entered: Mutex<Sender<String>>,
    release: Mutex<Receiver<()>>,
}

impl GatedHandler {
    fn new() -> (Arc<Self>, Receiver<String>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let handler = Arc::new(Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (handler, entered_rx, release_tx)
    }
}

impl ExtensionHandler for GatedHandler {
    fn install(
        &self,
        extension: &Extension,
        _artifact: Option<&Path>,
        _namespace: Option<&str>,
    ) -> anyhow::Result<()> {
        self.entered
            .lock()
            .expect("entered lock")
            .send(extension.id.id.clone())
            .expect("test must listen");
        self.release
            .lock()
            .expect("release lock")
            .recv_timeout(WAIT)
            .map_err(|err| anyhow::anyhow!("gate was never released: {err}"))
    }

    fn uninstall(&self, _extension: &Extension, _namespace: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FailingHandler;

impl ExtensionHandler for FailingHandler {
    fn install(
        &self,
        _extension: &Extension,
        _artifact: Option<&Path>,
        _namespace: Option<&str>,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }

    fn uninstall(&self, _extension: &Extension, _namespace: Option<&str>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }
}

struct PanickingHandler;

impl ExtensionHandler for PanickingHandler {
    fn install(
        &self,
        extension: &Extension,
        _artifact: Option<&Path>,
        _namespace: Option<&str>,
    ) -> anyhow::Result<()> {
        panic!("handler blew up on {}", extension.id);
    }

    fn uninstall(&self, _extension: &Extension, _namespace: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    percents: Mutex<Vec<u32>>,
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, _job: &str, progress: Progress) -> anyhow::Result<()> {
        self.percents
            .lock()
            .expect("percents lock")
            .push(progress.percent);
        Ok(())
    }
}

struct BrokenObserver;

impl ProgressObserver for BrokenObserver {
    fn on_progress(&self, _job: &str, _progress: Progress) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("observer went away"))
    }
}

#[test]
fn progress_walk_matches_nested_arithmetic() {
    let mut tracker = ProgressTracker::new("walk");
    let mut percents = Vec::new();

    tracker.push_level(4);
    percents.push(tracker.percent());
    tracker.step();
    percents.push(tracker.percent());
    tracker.push_level(2);
    percents.push(tracker.percent());
    tracker.step();
    percents.push(tracker.percent());
    tracker.pop_level();
    percents.push(tracker.percent());

    assert_eq!(percents, vec![0, 25, 25, 37, 50]);
    assert!((tracker.offset() - 0.5).abs() < 1e-12);
}

#[test]
fn progress_is_clamped_and_completes_on_final_pop() {
    let mut tracker = ProgressTracker::new("clamp");
    let handle = tracker.handle();

    tracker.push_level(2);
    tracker.step();
    tracker.step();
    tracker.step();
    assert_eq!(handle.percent(), 100);
    tracker.pop_level();
    assert_eq!(handle.percent(), 100);
    assert_eq!(tracker.depth(), 0);

    let mut empty = ProgressTracker::new("empty");
    empty.push_level(0);
    empty.step();
    assert_eq!(empty.percent(), 0);
    empty.pop_level();
    assert_eq!(empty.percent(), 100);
}

#[test]
fn observers_see_monotonic_values_and_failures_are_ignored() {
    let recording = Arc::new(RecordingObserver::default());
    let mut tracker = ProgressTracker::new("observed");
    tracker.add_observer(Arc::new(BrokenObserver));
    tracker.add_observer(recording.clone());

    tracker.push_level(3);
    tracker.step();
    tracker.push_level(2);
    tracker.step();
    tracker.step();
    tracker.pop_level();
    tracker.step();
    tracker.pop_level();

    let percents = recording.percents.lock().expect("percents lock").clone();
    assert_eq!(percents, vec![33, 50, 66, 100]);
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn engine_config_defaults_and_validation() {
    assert_eq!(EngineConfig::default().workers(), 2);
    assert_eq!(
        EngineConfig::default().remote_timeout(),
        Duration::from_secs(30)
    );

    let config = EngineConfig::from_toml_str("workers = 0\nroot_modifications_allowed = true\n")
        .expect("must parse config");
    assert_eq!(config.workers(), 1);
    assert!(config.root_modifications_allowed);

    let err = EngineConfig::from_toml_str("version = 2\n").expect_err("version 2 is unknown");
    assert!(err.to_string().contains("unsupported config version 2"));
    assert!(EngineConfig::from_toml_str("threads = 4\n").is_err());

    let root = test_root();
    let missing = EngineConfig::load(&root.join("config.toml")).expect("missing file is default");
    assert_eq!(missing, EngineConfig::default());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_job_installs_dependencies_and_copies_artifacts() {
    let fixture = Fixture::new();
    let payload = b"macro bundle".to_vec();
    let macros = requires(extension("macros", "1.0.0"), "rendering", "^2")
        .with_dependency(ExtensionDependency::new(
            "platform",
            VersionReq::parse(">=14").expect("valid req"),
        ))
        .with_artifact(ExtensionArtifact {
            url: "memory://macros-1.0.0.jar".to_string(),
            sha256: sha256_hex(&payload),
            size: Some(payload.len() as u64),
            archive: None,
        });
    fixture.remote.add_with_artifact(macros, payload.clone());
    fixture.remote.add(extension("rendering", "2.0.0"));

    let recording = Arc::new(RecordingObserver::default());
    let job = fixture
        .engine
        .submit_observed(
            JobKind::Install,
            request("install/macros", vec![id("macros", "1.0.0")])
                .with_namespace(Some("wiki-a".to_string())),
            vec![recording.clone() as Arc<dyn ProgressObserver>],
        )
        .expect("must submit");
    job.wait().expect("install must succeed");

    assert_eq!(job.state(), JobState::Finished);
    assert_eq!(job.progress().percent, 100);
    assert!(job.error().is_none());
    let store = fixture.store();
    let macros = store
        .get_installed_extension("macros", Some("wiki-a"))
        .expect("macros recorded");
    assert!(!macros.is_dependency());
    let rendering = store
        .get_installed_extension("rendering", Some("wiki-a"))
        .expect("rendering recorded");
    assert!(rendering.installed_as_dependency_of.contains("macros"));
    assert!(store.get_installed_extension("platform", None).is_none());

    let installed = fixture
        .layout()
        .extension_install_dir(Some("wiki-a"), "macros")
        .join("macros-1.0.0.jar");
    assert_eq!(fs::read(installed).expect("artifact copied"), payload);

    let percents = recording.percents.lock().expect("percents lock").clone();
    assert_eq!(percents.first(), Some(&50));
    assert_eq!(percents.last(), Some(&100));
}

#[test]
fn file_handler_names_copies_by_archive_type() {
    let fixture = Fixture::new();
    let bundle = b"bundle".to_vec();
    let tool = b"tool".to_vec();
    fixture.remote.add_with_artifact(
        extension("bundle", "1.0.0").with_artifact(ExtensionArtifact {
            url: "memory://bundle-1.0.0.tar.gz".to_string(),
            sha256: sha256_hex(&bundle),
            size: None,
            archive: None,
        }),
        bundle.clone(),
    );
    fixture.remote.add_with_artifact(
        extension("tool", "2.0.0").with_artifact(ExtensionArtifact {
            url: "memory://download/tool".to_string(),
            sha256: sha256_hex(&tool),
            size: None,
            archive: None,
        }),
        tool.clone(),
    );

    let job = fixture.run(
        JobKind::Install,
        request(
            "install/bundle-tool",
            vec![id("bundle", "1.0.0"), id("tool", "2.0.0")],
        ),
    );
    assert_eq!(job.state(), JobState::Finished);

    let layout = fixture.layout();
    let bundle_copy = layout
        .extension_install_dir(None, "bundle")
        .join("bundle-1.0.0.tar.gz");
    let tool_copy = layout.extension_install_dir(None, "tool").join("tool-2.0.0");
    assert_eq!(fs::read(bundle_copy).expect("archive copied"), bundle);
    assert_eq!(fs::read(tool_copy).expect("binary copied"), tool);
}

#[test]
fn plan_job_exposes_tree_without_touching_store() {
    let fixture = Fixture::new();
    fixture
        .remote
        .add(requires(extension("macros", "1.0.0"), "rendering", "^2"));
    fixture.remote.add(extension("rendering", "2.0.0"));

    let job = fixture.run(
        JobKind::InstallPlan,
        request("plan/macros", vec![id("macros", "1.0.0")]),
    );

    assert_eq!(job.state(), JobState::Finished);
    let plan = job.plan_tree().expect("plan must be exposed");
    assert_eq!(plan.actions().len(), 2);
    assert_eq!(fixture.store().count_extensions(), 0);
    assert_eq!(job.status().progress.percent, 100);
}

#[test]
fn installing_twice_fails_with_install_error() {
    let fixture = Fixture::new();
    fixture.remote.add(extension("macros", "1.0.0"));

    let first = fixture.run(
        JobKind::Install,
        request("install/first", vec![id("macros", "1.0.0")]),
    );
    assert_eq!(first.state(), JobState::Finished);

    let second = fixture.run(
        JobKind::Install,
        request("install/second", vec![id("macros", "1.0.0")]),
    );
    assert_eq!(second.state(), JobState::Failed);
    assert!(matches!(second.error(), Some(ExtensionError::Install { .. })));
    assert_eq!(fixture.store().count_extensions(), 1);
}

#[test]
fn uninstalling_twice_fails_with_uninstall_error() {
    let fixture = Fixture::new();
    fixture.remote.add(extension("macros", "1.0.0"));
    let installed = fixture.run(
        JobKind::Install,
        request("install/macros", vec![id("macros", "1.0.0")])
            .with_namespace(Some("wiki-a".to_string())),
    );
    assert_eq!(installed.state(), JobState::Finished);
    assert!(fixture
        .layout()
        .extension_install_dir(Some("wiki-a"), "macros")
        .exists());

    let uninstall = request("uninstall/macros", vec![id("macros", "1.0.0")])
        .with_namespace(Some("wiki-a".to_string()));
    let first = fixture.run(JobKind::Uninstall, uninstall.clone());
    assert_eq!(first.state(), JobState::Finished);
    assert_eq!(fixture.store().count_extensions(), 0);
    assert!(!fixture
        .layout()
        .extension_install_dir(Some("wiki-a"), "macros")
        .exists());

    let second = fixture.run(JobKind::Uninstall, uninstall);
    assert_eq!(second.state(), JobState::Failed);
    assert!(matches!(
        second.error(),
        Some(ExtensionError::Uninstall { .. })
    ));
}

#[test]
fn upgrade_job_replaces_installed_release() {
    let fixture = Fixture::new();
    fixture.remote.add(extension("macros", "1.0.0"));
    fixture.remote.add(extension("macros", "1.1.0"));
    let namespace = Some("wiki-a".to_string());

    fixture.run(
        JobKind::Install,
        request("install/old", vec![id("macros", "1.0.0")]).with_namespace(namespace.clone()),
    );
    let upgrade = fixture.run(
        JobKind::Install,
        request("install/new", vec![id("macros", "1.1.0")]).with_namespace(namespace),
    );

    assert_eq!(upgrade.state(), JobState::Finished);
    let installed = fixture
        .store()
        .get_installed_extension("macros", Some("wiki-a"))
        .expect("macros recorded");
    assert_eq!(installed.id(), &id("macros", "1.1.0"));
    assert_eq!(fixture.store().count_extensions(), 1);
    let marker = fixture
        .layout()
        .extension_install_dir(Some("wiki-a"), "macros")
        .join("version");
    assert_eq!(
        fs::read_to_string(marker).expect("marker written"),
        "1.1.0\n"
    );
}

#[test]
fn handler_failure_keeps_applied_actions_and_fails_job() {
    let fixture = Fixture::with(
        |handlers| handlers.register("broken", Arc::new(FailingHandler)),
        EngineConfig::default(),
    );
    fixture.remote.add(extension("rendering", "2.0.0"));
    let mut macros = requires(extension("macros", "1.0.0"), "rendering", "^2");
    macros.extension_type = "broken".to_string();
    fixture.remote.add(macros);

    let job = fixture.run(
        JobKind::Install,
        request("install/macros", vec![id("macros", "1.0.0")]),
    );

    assert_eq!(job.state(), JobState::Failed);
    match job.error() {
        Some(ExtensionError::Install { id, reason, .. }) => {
            assert_eq!(id, "macros@1.0.0");
            assert!(reason.contains("disk full"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fixture
        .store()
        .get_installed_extension("rendering", None)
        .is_some());
    assert!(fixture
        .store()
        .get_installed_extension("macros", None)
        .is_none());
    assert!(job.progress().percent < 100);
}

#[test]
fn panicking_handler_fails_job_and_frees_worker_and_id() {
    let fixture = Fixture::with(
        |handlers| handlers.register("boom", Arc::new(PanickingHandler)),
        EngineConfig::default(),
    );
    let mut bad = extension("bad", "1.0.0");
    bad.extension_type = "boom".to_string();
    fixture.remote.add(bad);
    fixture.remote.add(extension("good", "1.0.0"));

    // More panics than workers: each must come back as a failed job.
    for _ in 0..3 {
        let job = fixture
            .engine
            .submit(
                JobKind::Install,
                request("install/bad", vec![id("bad", "1.0.0")]),
            )
            .expect("id must be free again after a panic");
        let outcome = job.wait_timeout(WAIT).expect("job must finish in time");
        match outcome {
            Err(ExtensionError::Job { reason, .. }) => {
                assert!(reason.contains("panicked"), "{reason}");
                assert!(reason.contains("bad@1.0.0"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(job.state(), JobState::Failed);
    }

    let good = fixture.run(
        JobKind::Install,
        request("install/good", vec![id("good", "1.0.0")]),
    );
    assert_eq!(good.state(), JobState::Finished);
    assert_eq!(fixture.store().count_extensions(), 1);
}

#[test]
fn same_release_installs_into_two_namespaces_share_the_cache() {
    let fixture = Fixture::with(|_| {}, EngineConfig::default());
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 241) as u8).collect();
    fixture.remote.add_with_artifact(
        extension("shared", "1.0.0").with_artifact(ExtensionArtifact {
            url: "memory://shared-1.0.0.jar".to_string(),
            sha256: sha256_hex(&payload),
            size: Some(payload.len() as u64),
            archive: None,
        }),
        payload.clone(),
    );

    let jobs: Vec<Job> = ["wiki-a", "wiki-b"]
        .into_iter()
        .map(|namespace| {
            fixture
                .engine
                .submit(
                    JobKind::Install,
                    request(&format!("install/shared/{namespace}"), vec![id("shared", "1.0.0")])
                        .with_namespace(Some(namespace.to_string())),
                )
                .expect("must submit")
        })
        .collect();
    for job in &jobs {
        job.wait_timeout(WAIT)
            .expect("job must finish in time")
            .expect("concurrent install must succeed");
    }

    for namespace in ["wiki-a", "wiki-b"] {
        let copied = fixture
            .layout()
            .extension_install_dir(Some(namespace), "shared")
            .join("shared-1.0.0.jar");
        assert_eq!(fs::read(copied).expect("artifact copied"), payload);
    }
    let cache_dir = fixture
        .layout()
        .artifacts_cache_dir()
        .join("shared")
        .join("1.0.0");
    let leftovers: Vec<_> = fs::read_dir(&cache_dir)
        .expect("cache dir exists")
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "part"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn bundled_or_installed_targets_fail_regardless_of_request_order() {
    let fixture = Fixture::new();
    fixture
        .remote
        .add(requires(extension("macros", "1.0.0"), "rendering", "^2"));
    fixture.remote.add(requires(
        extension("widgets", "1.0.0"),
        "platform",
        ">=14",
    ));
    fixture.remote.add(extension("rendering", "2.0.0"));
    fixture
        .store()
        .install(&extension("rendering", "2.0.0"), Some("wiki-a"), None)
        .expect("must install rendering");

    let installed = fixture.run(
        JobKind::Install,
        request(
            "install/macros-rendering",
            vec![id("macros", "1.0.0"), id("rendering", "2.0.0")],
        )
        .with_namespace(Some("wiki-a".to_string())),
    );
    assert_eq!(installed.state(), JobState::Failed);
    match installed.error() {
        Some(ExtensionError::Install { reason, .. }) => assert_eq!(reason, "already installed"),
        other => panic!("unexpected error: {other:?}"),
    }

    let core = fixture.run(
        JobKind::Install,
        request(
            "install/widgets-platform",
            vec![id("widgets", "1.0.0"), id("platform", "14.0.0")],
        ),
    );
    assert_eq!(core.state(), JobState::Failed);
    match core.error() {
        Some(ExtensionError::Install { reason, .. }) => {
            assert_eq!(reason, "extension is part of core")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fixture.store().count_extensions(), 1);
}

#[test]
fn missing_handler_fails_install() {
    let fixture = Fixture::new();
    let mut macros = extension("macros", "1.0.0");
    macros.extension_type = "script".to_string();
    fixture.remote.add(macros);

    let job = fixture.run(
        JobKind::Install,
        request("install/macros", vec![id("macros", "1.0.0")]),
    );

    match job.error() {
        Some(ExtensionError::Install { reason, .. }) => {
            assert!(reason.contains("no handler registered for type 'script'"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn duplicate_job_id_is_rejected_while_running() {
    let (gate, entered, release) = GatedHandler::new();
    let fixture = Fixture::with(
        |handlers| handlers.register("gated", gate),
        EngineConfig::default(),
    );
    let mut macros = extension("macros", "1.0.0");
    macros.extension_type = "gated".to_string();
    fixture.remote.add(macros);

    let first = fixture
        .engine
        .submit(
            JobKind::Install,
            request("install/macros", vec![id("macros", "1.0.0")]),
        )
        .expect("must submit");
    assert_eq!(
        entered.recv_timeout(WAIT).expect("handler must start"),
        "macros"
    );
    assert_eq!(first.state(), JobState::Running);

    let err = fixture
        .engine
        .submit(
            JobKind::Install,
            request("install/macros", vec![id("macros", "1.0.0")]),
        )
        .expect_err("same id must be rejected");
    assert!(matches!(err, ExtensionError::Job { .. }));
    assert!(err.to_string().contains("install/macros"));

    release.send(()).expect("must release gate");
    first.wait().expect("first job must finish");
    let again = fixture.run(
        JobKind::InstallPlan,
        request("install/macros", vec![id("macros", "1.0.0")]),
    );
    assert!(matches!(again.error(), Some(ExtensionError::Install { .. })));
}

#[test]
fn cancelled_job_stops_before_next_action() {
    let (gate, entered, release) = GatedHandler::new();
    let fixture = Fixture::with(
        |handlers| handlers.register("gated", gate),
        EngineConfig::default(),
    );
    let mut rendering = extension("rendering", "2.0.0");
    rendering.extension_type = "gated".to_string();
    fixture.remote.add(rendering);
    fixture
        .remote
        .add(requires(extension("macros", "1.0.0"), "rendering", "^2"));

    let job = fixture
        .engine
        .submit(
            JobKind::Install,
            request("install/macros", vec![id("macros", "1.0.0")]),
        )
        .expect("must submit");
    assert_eq!(
        entered.recv_timeout(WAIT).expect("handler must start"),
        "rendering"
    );
    job.cancel();
    release.send(()).expect("must release gate");

    let err = job.wait().expect_err("cancelled job must fail");
    assert_eq!(
        err,
        ExtensionError::Cancelled {
            job: "install/macros".to_string()
        }
    );
    assert_eq!(job.state(), JobState::Failed);
    assert!(fixture
        .store()
        .get_installed_extension("rendering", None)
        .is_some());
    assert!(fixture
        .store()
        .get_installed_extension("macros", None)
        .is_none());
}

#[test]
fn root_install_propagates_to_namespaces_when_configured() {
    let config = EngineConfig {
        root_modifications_allowed: true,
        ..EngineConfig::default()
    };
    let fixture = Fixture::with(|_| {}, config);
    fixture.remote.add(extension("theme", "1.0.0"));
    fixture.remote.add(extension("macros", "1.0.0"));
    fixture.run(
        JobKind::Install,
        request("install/theme", vec![id("theme", "1.0.0")])
            .with_namespace(Some("wiki-a".to_string())),
    );

    let job = fixture.run(
        JobKind::Install,
        request("install/macros", vec![id("macros", "1.0.0")]),
    );

    assert_eq!(job.state(), JobState::Finished);
    let layout = fixture.layout();
    assert!(layout.extension_install_dir(None, "macros").exists());
    assert!(layout.extension_install_dir(Some("wiki-a"), "macros").exists());
    let recorded = fixture
        .store()
        .get_installed_extension("macros", Some("wiki-a"))
        .expect("visible from wiki-a");
    assert!(recorded.is_installed_at_root());
    assert!(!recorded.is_installed_in(Some("wiki-a")));
}

#[test]
fn submit_rejects_empty_job_id_and_jobs_after_shutdown() {
    let mut fixture = Fixture::new();

    let empty = fixture
        .engine
        .submit(JobKind::InstallPlan, Request::new(Vec::new(), Vec::new()))
        .expect_err("empty id must be rejected");
    assert!(matches!(empty, ExtensionError::Job { .. }));

    fixture.engine.shutdown();
    let late = fixture
        .engine
        .submit(
            JobKind::InstallPlan,
            request("plan/late", vec![id("macros", "1.0.0")]),
        )
        .expect_err("engine is stopped");
    assert!(matches!(late, ExtensionError::Job { .. }));
}

fn test_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "extpack-job-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
