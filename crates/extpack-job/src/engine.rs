use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use extpack_core::{namespace_label, ExtensionError, ExtensionResult, ResolvedExtension};
use extpack_planner::{ExtensionAction, ExtensionPlan, ExtensionPlanAction, ExtensionPlanner, PlanOptions};
use extpack_repository::{CoreRepository, RepositoryChain};
use extpack_security::verify_sha256_file;
use extpack_store::LocalExtensionStore;

use crate::config::EngineConfig;
use crate::handler::{ExtensionHandler, HandlerRegistry};
use crate::job::{Job, JobKind, Request};
use crate::progress::{ProgressObserver, ProgressTracker};

/// The repositories, store and handlers every job runs against.
#[derive(Clone)]
pub struct EngineContext {
    pub core: Arc<CoreRepository>,
    pub store: Arc<LocalExtensionStore>,
    pub chain: Arc<RepositoryChain>,
    pub handlers: HandlerRegistry,
}

struct Queued {
    job: Job,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Queued>,
    shutting_down: bool,
}

struct EngineInner {
    context: EngineContext,
    config: EngineConfig,
    queue: Mutex<Queue>,
    available: Condvar,
    active: Mutex<HashSet<Vec<String>>>,
    /// One lock per artifact cache path; jobs for the same release in
    /// different namespaces share the cached file.
    downloads: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Runs jobs on a fixed pool of worker threads.
pub struct JobEngine {
    inner: Arc<EngineInner>,
    workers: Vec<JoinHandle<()>>,
}

impl JobEngine {
    pub fn new(context: EngineContext, config: EngineConfig) -> Self {
        let worker_count = config.workers();
        let inner = Arc::new(EngineInner {
            context,
            config,
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            active: Mutex::new(HashSet::new()),
            downloads: Mutex::new(HashMap::new()),
        });
        let workers = (0..worker_count)
            .map(|index| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("extpack-worker-{index}"))
                    .spawn(move || worker_loop(&inner))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!(error = %err, "failed spawning job worker");
                    None
                }
            })
            .collect();
        Self { inner, workers }
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn submit(&self, kind: JobKind, request: Request) -> ExtensionResult<Job> {
        self.submit_observed(kind, request, Vec::new())
    }

    /// Queues a job whose progress changes are also sent to `observers`.
    pub fn submit_observed(
        &self,
        kind: JobKind,
        request: Request,
        observers: Vec<Arc<dyn ProgressObserver>>,
    ) -> ExtensionResult<Job> {
        let label = request.job_label();
        if request.id.is_empty() {
            return Err(ExtensionError::job(label, "job id must not be empty"));
        }
        if self.workers.is_empty() {
            return Err(ExtensionError::job(label, "no job workers are running"));
        }

        let mut queue = lock(&self.inner.queue);
        if queue.shutting_down {
            return Err(ExtensionError::job(label, "job engine is shutting down"));
        }
        if !lock(&self.inner.active).insert(request.id.clone()) {
            return Err(ExtensionError::job(
                label,
                "a job with this id is already queued or running",
            ));
        }

        let job = Job::new(kind, request);
        tracing::debug!(job = %label, kind = kind.as_str(), "job queued");
        queue.pending.push_back(Queued {
            job: job.clone(),
            observers,
        });
        drop(queue);
        self.inner.available.notify_one();
        Ok(job)
    }

    /// Runs what is already queued, then stops every worker.
    pub fn shutdown(&mut self) {
        lock(&self.inner.queue).shutting_down = true;
        self.inner.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("job worker panicked");
            }
        }
    }
}

impl Drop for JobEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &EngineInner) {
    loop {
        let next = {
            let mut queue = lock(&inner.queue);
            loop {
                if let Some(next) = queue.pending.pop_front() {
                    break Some(next);
                }
                if queue.shutting_down {
                    break None;
                }
                queue = inner
                    .available
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };
        let Some(Queued { job, observers }) = next else {
            return;
        };

        job.mark_running();
        let result = panic::catch_unwind(AssertUnwindSafe(|| run_job(inner, &job, observers)))
            .unwrap_or_else(|payload| {
                Err(ExtensionError::job(
                    job.label(),
                    format!("panicked: {}", panic_message(payload.as_ref())),
                ))
            });
        match &result {
            Ok(()) => tracing::info!(job = %job.label(), kind = job.kind().as_str(), "job finished"),
            Err(err) => tracing::warn!(job = %job.label(), error = %err, "job failed"),
        }
        lock(&inner.active).remove(&job.request().id);
        job.finish(result);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn run_job(
    inner: &EngineInner,
    job: &Job,
    observers: Vec<Arc<dyn ProgressObserver>>,
) -> ExtensionResult<()> {
    let context = &inner.context;
    let config = &inner.config;
    let mut tracker = ProgressTracker::new(job.label()).with_handle(job.progress_handle());
    for observer in observers {
        tracker.add_observer(observer);
    }

    tracker.push_level(2);
    let plan = plan_job(context, config, job)?;
    job.set_plan(plan.clone());
    tracker.step();

    if job.kind() == JobKind::InstallPlan {
        tracker.pop_level();
        return Ok(());
    }

    let executor = Executor {
        context,
        config,
        job,
        downloads: &inner.downloads,
    };
    tracker.push_level(plan.actions().len());
    executor.execute(&plan, &mut tracker)?;
    tracker.pop_level();
    tracker.pop_level();
    Ok(())
}

fn plan_job(context: &EngineContext, config: &EngineConfig, job: &Job) -> ExtensionResult<ExtensionPlan> {
    let request = job.request();
    let planner = ExtensionPlanner::new(&context.core, &context.store, &context.chain).with_options(
        PlanOptions {
            interactive: request.interactive,
            root_modifications_allowed: request.root_modifications_allowed
                || config.root_modifications_allowed,
            remote_timeout: Some(config.remote_timeout()),
        },
    );
    match job.kind() {
        JobKind::InstallPlan | JobKind::Install => {
            planner.plan_install(&request.target_extensions, request.namespace())
        }
        JobKind::Uninstall => planner.plan_uninstall(&request.target_extensions, request.namespace()),
    }
}

struct Executor<'a> {
    context: &'a EngineContext,
    config: &'a EngineConfig,
    job: &'a Job,
    downloads: &'a Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Executor<'_> {
    /// Applies every action in order. A failure stops the walk; what was
    /// already applied stays applied.
    fn execute(&self, plan: &ExtensionPlan, tracker: &mut ProgressTracker) -> ExtensionResult<()> {
        let mut applied: Vec<String> = Vec::new();
        for action in plan.actions() {
            let outcome = if self.job.is_cancelled() {
                Err(ExtensionError::Cancelled {
                    job: self.job.label(),
                })
            } else {
                self.apply(action)
            };
            if let Err(err) = outcome {
                if !applied.is_empty() {
                    tracing::warn!(
                        job = %self.job.label(),
                        applied = %applied.join(", "),
                        "job stopped; applied actions were not rolled back"
                    );
                }
                return Err(err);
            }
            if action.action.changes_state() {
                applied.push(action.to_string());
            }
            tracker.step();
        }
        Ok(())
    }

    fn apply(&self, action: &ExtensionPlanAction) -> ExtensionResult<()> {
        match action.action {
            ExtensionAction::None => {
                tracing::debug!(extension = %action.id(), "already satisfied");
                Ok(())
            }
            ExtensionAction::Install | ExtensionAction::Upgrade => self.apply_install(action),
            ExtensionAction::Uninstall => self.apply_uninstall(action),
        }
    }

    fn apply_install(&self, action: &ExtensionPlanAction) -> ExtensionResult<()> {
        let extension = action.extension.extension();
        let namespace = action.namespace();
        let install_error =
            |reason: String| ExtensionError::install(extension.id.to_string(), namespace, reason);
        let handler = self.handler(&extension.extension_type).ok_or_else(|| {
            install_error(format!(
                "no handler registered for type '{}'",
                extension.extension_type
            ))
        })?;
        let artifact = self.fetch_artifact(action)?;
        let artifact = artifact.as_deref();

        let previous = match (action.action, &action.previous) {
            (ExtensionAction::Upgrade, Some(previous)) if !action.propagated => Some(previous),
            _ => None,
        };
        let handled = match previous {
            Some(previous) => handler.upgrade(&previous.extension, extension, artifact, namespace),
            None => handler.install(extension, artifact, namespace),
        };
        handled.map_err(|err| install_error(format!("{err:#}")))?;

        if action.propagated {
            tracing::info!(
                extension = %extension.id,
                namespace = namespace_label(namespace),
                "propagated root install"
            );
            return Ok(());
        }

        let dependency_of = if action.dependency {
            action.required_by.iter().next().map(String::as_str)
        } else {
            None
        };
        match previous {
            Some(previous) => {
                self.context
                    .store
                    .upgrade(previous, extension, namespace, dependency_of)?;
            }
            None => {
                self.context
                    .store
                    .install(extension, namespace, dependency_of)?;
            }
        }
        tracing::info!(
            extension = %extension.id,
            namespace = namespace_label(namespace),
            action = action.action.as_str(),
            "applied"
        );
        Ok(())
    }

    fn apply_uninstall(&self, action: &ExtensionPlanAction) -> ExtensionResult<()> {
        let extension = action.extension.extension();
        let namespace = action.namespace();
        let handler = self.handler(&extension.extension_type).ok_or_else(|| {
            ExtensionError::uninstall(
                extension.id.to_string(),
                namespace,
                format!(
                    "no handler registered for type '{}'",
                    extension.extension_type
                ),
            )
        })?;
        handler.uninstall(extension, namespace).map_err(|err| {
            ExtensionError::uninstall(extension.id.to_string(), namespace, format!("{err:#}"))
        })?;
        self.context.store.uninstall(&extension.id, namespace)?;
        tracing::info!(
            extension = %extension.id,
            namespace = namespace_label(namespace),
            "uninstalled"
        );
        Ok(())
    }

    /// Downloads a remote extension's artifact into the store cache, reusing
    /// a cached copy whose digest still matches.
    fn fetch_artifact(&self, action: &ExtensionPlanAction) -> ExtensionResult<Option<PathBuf>> {
        let ResolvedExtension::Remote(extension) = &action.extension else {
            return Ok(None);
        };
        let Some(artifact) = &extension.artifact else {
            return Ok(None);
        };
        let target = self.context.store.artifact_path(extension);
        let download_lock = self.download_lock(&target);
        let _download_guard = lock(&download_lock);
        let cached = target.exists()
            && verify_sha256_file(&target, &artifact.sha256).unwrap_or_else(|err| {
                tracing::warn!(path = %target.display(), error = %format!("{err:#}"), "unreadable cached artifact");
                false
            });
        if !cached {
            let written = self.context.chain.download_with_timeout(
                extension,
                &target,
                self.config.remote_timeout(),
            )?;
            tracing::debug!(extension = %extension.id, bytes = written, "artifact downloaded");
        }
        Ok(Some(target))
    }

    fn download_lock(&self, target: &Path) -> Arc<Mutex<()>> {
        Arc::clone(
            lock(self.downloads)
                .entry(target.to_path_buf())
                .or_default(),
        )
    }

    fn handler(&self, extension_type: &str) -> Option<Arc<dyn ExtensionHandler>> {
        self.context.handlers.get(extension_type)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
