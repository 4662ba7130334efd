use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use extpack_core::{ExtensionError, ExtensionId, ExtensionResult};
use extpack_planner::ExtensionPlan;
use serde::Serialize;

use crate::progress::{Progress, ProgressHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Plans only; never touches the local store.
    InstallPlan,
    Install,
    Uninstall,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstallPlan => "install_plan",
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Created,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// What a job should do. `id` is the path naming this job instance; only one
/// job per path may be queued or running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub target_extensions: Vec<ExtensionId>,
    pub namespace: Option<String>,
    pub interactive: bool,
    pub root_modifications_allowed: bool,
    pub id: Vec<String>,
}

impl Request {
    pub fn new(id: Vec<String>, target_extensions: Vec<ExtensionId>) -> Self {
        Self {
            target_extensions,
            namespace: None,
            interactive: false,
            root_modifications_allowed: false,
            id,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_root_modifications_allowed(mut self, allowed: bool) -> Self {
        self.root_modifications_allowed = allowed;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn job_label(&self) -> String {
        self.id.join("/")
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub error: Option<ExtensionError>,
    pub progress: Progress,
}

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    error: Option<ExtensionError>,
    plan: Option<ExtensionPlan>,
}

#[derive(Debug)]
struct JobShared {
    kind: JobKind,
    request: Request,
    record: Mutex<JobRecord>,
    changed: Condvar,
    cancelled: AtomicBool,
    progress: ProgressHandle,
}

/// Handle to a submitted job. Clones refer to the same job.
#[derive(Debug, Clone)]
pub struct Job {
    shared: Arc<JobShared>,
}

impl Job {
    pub(crate) fn new(kind: JobKind, request: Request) -> Self {
        Self {
            shared: Arc::new(JobShared {
                kind,
                request,
                record: Mutex::new(JobRecord {
                    state: JobState::Created,
                    error: None,
                    plan: None,
                }),
                changed: Condvar::new(),
                cancelled: AtomicBool::new(false),
                progress: ProgressHandle::default(),
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.shared.kind
    }

    pub fn request(&self) -> &Request {
        &self.shared.request
    }

    pub fn label(&self) -> String {
        self.shared.request.job_label()
    }

    pub fn state(&self) -> JobState {
        self.record().state
    }

    pub fn error(&self) -> Option<ExtensionError> {
        self.record().error.clone()
    }

    pub fn progress(&self) -> Progress {
        self.shared.progress.snapshot()
    }

    pub fn status(&self) -> JobStatus {
        let record = self.record();
        JobStatus {
            state: record.state,
            error: record.error.clone(),
            progress: self.progress(),
        }
    }

    /// The computed plan, once planning has finished.
    pub fn plan_tree(&self) -> Option<ExtensionPlan> {
        self.record().plan.clone()
    }

    /// Requests cancellation; checked before each planned action.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until the job is FINISHED or FAILED.
    pub fn wait(&self) -> ExtensionResult<()> {
        let mut record = self.record();
        while !record.state.is_terminal() {
            record = self
                .shared
                .changed
                .wait(record)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        outcome(&record)
    }

    /// Like [`Job::wait`], but gives up after `timeout` and returns `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExtensionResult<()>> {
        let deadline = Instant::now() + timeout;
        let mut record = self.record();
        while !record.state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (next, _) = self
                .shared
                .changed
                .wait_timeout(record, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            record = next;
        }
        Some(outcome(&record))
    }

    pub(crate) fn progress_handle(&self) -> ProgressHandle {
        self.shared.progress.clone()
    }

    pub(crate) fn mark_running(&self) {
        self.transition(|record| record.state = JobState::Running);
    }

    pub(crate) fn set_plan(&self, plan: ExtensionPlan) {
        self.transition(|record| record.plan = Some(plan));
    }

    pub(crate) fn finish(&self, result: ExtensionResult<()>) {
        self.transition(|record| match result {
            Ok(()) => record.state = JobState::Finished,
            Err(err) => {
                record.state = JobState::Failed;
                record.error = Some(err);
            }
        });
    }

    fn transition(&self, update: impl FnOnce(&mut JobRecord)) {
        let mut record = self.record();
        update(&mut record);
        drop(record);
        self.shared.changed.notify_all();
    }

    fn record(&self) -> MutexGuard<'_, JobRecord> {
        self.shared
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn outcome(record: &JobRecord) -> ExtensionResult<()> {
    match &record.error {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}
