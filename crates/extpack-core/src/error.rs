use crate::extension::namespace_label;

pub type ExtensionResult<T> = std::result::Result<T, ExtensionError>;

/// Failures surfaced by planning, repositories and job execution.
///
/// Payloads are plain strings so the error can be cloned into job state and
/// read from other threads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("failed to resolve extension '{id}': {reason}")]
    Resolve { id: String, reason: String },

    #[error("failed to install extension '{id}' in namespace {namespace}: {reason}")]
    Install {
        id: String,
        namespace: String,
        reason: String,
    },

    #[error("failed to uninstall extension '{id}' from namespace {namespace}: {reason}")]
    Uninstall {
        id: String,
        namespace: String,
        reason: String,
    },

    #[error("failed to collect extensions from repository '{repository}': {reason}")]
    Collect { repository: String, reason: String },

    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("job '{job}' failed: {reason}")]
    Job { job: String, reason: String },

    #[error("job '{job}' was cancelled")]
    Cancelled { job: String },
}

impl ExtensionError {
    pub fn resolve(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolve {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn install(id: impl Into<String>, namespace: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Install {
            id: id.into(),
            namespace: namespace_label(namespace).to_string(),
            reason: reason.into(),
        }
    }

    pub fn uninstall(
        id: impl Into<String>,
        namespace: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Uninstall {
            id: id.into(),
            namespace: namespace_label(namespace).to_string(),
            reason: reason.into(),
        }
    }

    pub fn collect(repository: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Collect {
            repository: repository.into(),
            reason: reason.into(),
        }
    }

    pub fn job(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Job {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Converts an `anyhow` chain into a `Collect` error, keeping every
    /// context line.
    pub fn collect_from(repository: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::collect(repository, format!("{err:#}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "resolve",
            Self::Install { .. } => "install",
            Self::Uninstall { .. } => "uninstall",
            Self::Collect { .. } => "collect",
            Self::DependencyCycle { .. } => "dependency-cycle",
            Self::Job { .. } => "job",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
