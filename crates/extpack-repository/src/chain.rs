use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use extpack_core::{
    Extension, ExtensionDependency, ExtensionError, ExtensionId, ExtensionResult, RepositoryId,
};

use crate::Repository;

type Attempt = Arc<dyn Fn(&dyn Repository) -> ExtensionResult<Extension> + Send + Sync>;

/// Ordered remote repositories with sticky resolution.
///
/// The first repository that resolves an id is remembered (write-once) and
/// consulted first for every later lookup of that id, even when a
/// repository inserted ahead of it would also match.
#[derive(Default)]
pub struct RepositoryChain {
    repositories: RwLock<Vec<Arc<dyn Repository>>>,
    resolved_from: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for RepositoryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryChain").finish_non_exhaustive()
    }
}

impl RepositoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repository(&self, repository: Arc<dyn Repository>) {
        tracing::debug!(repository = %repository.id(), "adding repository to chain");
        self.write_repositories().push(repository);
    }

    /// Inserts at `index`, clamped to the end of the chain.
    pub fn insert_repository(&self, index: usize, repository: Arc<dyn Repository>) {
        let mut repositories = self.write_repositories();
        let index = index.min(repositories.len());
        tracing::debug!(repository = %repository.id(), index, "inserting repository into chain");
        repositories.insert(index, repository);
    }

    pub fn remove_repository(&self, name: &str) -> Option<Arc<dyn Repository>> {
        let mut repositories = self.write_repositories();
        let position = repositories
            .iter()
            .position(|repository| repository.id().name == name)?;
        Some(repositories.remove(position))
    }

    pub fn repository(&self, name: &str) -> Option<Arc<dyn Repository>> {
        self.snapshot()
            .into_iter()
            .find(|repository| repository.id().name == name)
    }

    pub fn repository_ids(&self) -> Vec<RepositoryId> {
        self.snapshot()
            .iter()
            .map(|repository| repository.id().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the repository `id` is pinned to, if it was resolved before.
    pub fn sticky_repository(&self, id: &str) -> Option<String> {
        self.resolved_from
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn resolve(&self, id: &ExtensionId) -> ExtensionResult<Extension> {
        self.resolve_id(id, None)
    }

    pub fn resolve_with_timeout(
        &self,
        id: &ExtensionId,
        timeout: Duration,
    ) -> ExtensionResult<Extension> {
        self.resolve_id(id, Some(timeout))
    }

    pub fn resolve_dependency(
        &self,
        dependency: &ExtensionDependency,
    ) -> ExtensionResult<Extension> {
        self.resolve_requirement(dependency, None)
    }

    pub fn resolve_dependency_with_timeout(
        &self,
        dependency: &ExtensionDependency,
        timeout: Duration,
    ) -> ExtensionResult<Extension> {
        self.resolve_requirement(dependency, Some(timeout))
    }

    fn resolve_id(&self, id: &ExtensionId, timeout: Option<Duration>) -> ExtensionResult<Extension> {
        let wanted = id.clone();
        self.resolve_with(
            &id.id,
            id.to_string(),
            timeout,
            Arc::new(move |repository| repository.resolve(&wanted)),
        )
    }

    fn resolve_requirement(
        &self,
        dependency: &ExtensionDependency,
        timeout: Option<Duration>,
    ) -> ExtensionResult<Extension> {
        let wanted = dependency.clone();
        self.resolve_with(
            &dependency.id,
            dependency.to_string(),
            timeout,
            Arc::new(move |repository| repository.resolve_dependency(&wanted)),
        )
    }

    fn resolve_with(
        &self,
        key: &str,
        label: String,
        timeout: Option<Duration>,
        attempt: Attempt,
    ) -> ExtensionResult<Extension> {
        let repositories = self.snapshot();
        let sticky = self.sticky_repository(key);
        let mut failures = Vec::new();

        if let Some(name) = &sticky {
            if let Some(repository) = repositories
                .iter()
                .find(|repository| &repository.id().name == name)
            {
                match run_attempt(repository, &attempt, timeout) {
                    Ok(extension) => {
                        tracing::debug!(%label, repository = %name, "resolved from pinned repository");
                        return Ok(extension);
                    }
                    Err(reason) => failures.push(format!("{name}: {reason}")),
                }
            }
        }

        for repository in &repositories {
            let name = &repository.id().name;
            if sticky.as_ref() == Some(name) {
                continue;
            }
            match run_attempt(repository, &attempt, timeout) {
                Ok(extension) => {
                    tracing::debug!(%label, repository = %name, "resolved from repository");
                    self.remember(key, name);
                    return Ok(extension);
                }
                Err(reason) => failures.push(format!("{name}: {reason}")),
            }
        }

        let reason = if failures.is_empty() {
            "no remote repositories configured".to_string()
        } else {
            failures.join("; ")
        };
        Err(ExtensionError::resolve(label, reason))
    }

    /// Versions from the first repository that knows `id`, honoring the pin.
    pub fn versions(&self, id: &str) -> ExtensionResult<Vec<Extension>> {
        let mut repositories = self.snapshot();
        if let Some(name) = self.sticky_repository(id) {
            if let Some(position) = repositories
                .iter()
                .position(|repository| repository.id().name == name)
            {
                let pinned = repositories.remove(position);
                repositories.insert(0, pinned);
            }
        }

        for repository in repositories {
            let versions = repository.versions(id)?;
            if !versions.is_empty() {
                return Ok(versions);
            }
        }
        Ok(Vec::new())
    }

    /// Union of matching ids across repositories. A failing repository is
    /// logged and skipped.
    pub fn search(&self, needle: &str) -> ExtensionResult<Vec<String>> {
        let mut names = BTreeSet::new();
        for repository in self.snapshot() {
            match repository.search(needle) {
                Ok(found) => names.extend(found),
                Err(err) => {
                    tracing::warn!(repository = %repository.id(), error = %err, "search failed")
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn download(&self, extension: &Extension, target: &Path) -> ExtensionResult<u64> {
        self.owning_repository(extension)?.download(extension, target)
    }

    pub fn download_with_timeout(
        &self,
        extension: &Extension,
        target: &Path,
        timeout: Duration,
    ) -> ExtensionResult<u64> {
        let repository = self.owning_repository(extension)?;
        let name = repository.id().to_string();
        let owned_extension = extension.clone();
        let owned_target: PathBuf = target.to_path_buf();
        match run_with_timeout(&name, timeout, move || {
            repository.download(&owned_extension, &owned_target)
        }) {
            Some(result) => result,
            None => Err(ExtensionError::collect(
                name,
                format!(
                    "download of '{}' timed out after {}ms",
                    extension.id,
                    timeout.as_millis()
                ),
            )),
        }
    }

    fn owning_repository(&self, extension: &Extension) -> ExtensionResult<Arc<dyn Repository>> {
        self.repository(&extension.repository.name).ok_or_else(|| {
            ExtensionError::collect(
                extension.repository.to_string(),
                format!(
                    "repository for '{}' is not part of the chain",
                    extension.id
                ),
            )
        })
    }

    fn remember(&self, key: &str, name: &str) {
        self.resolved_from
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_insert_with(|| name.to_string());
    }

    fn snapshot(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_repositories(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Repository>>> {
        self.repositories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn run_attempt(
    repository: &Arc<dyn Repository>,
    attempt: &Attempt,
    timeout: Option<Duration>,
) -> Result<Extension, String> {
    let Some(timeout) = timeout else {
        return attempt(repository.as_ref()).map_err(|err| err.to_string());
    };

    let name = repository.id().to_string();
    let owned_repository = Arc::clone(repository);
    let owned_attempt = Arc::clone(attempt);
    match run_with_timeout(&name, timeout, move || {
        owned_attempt(owned_repository.as_ref())
    }) {
        Some(result) => result.map_err(|err| err.to_string()),
        None => {
            tracing::warn!(
                repository = %name,
                timeout_ms = timeout.as_millis() as u64,
                "repository timed out, advancing to next"
            );
            Err(format!("timed out after {}ms", timeout.as_millis()))
        }
    }
}

/// `None` when `op` did not finish within `timeout`. The worker thread is
/// left to finish on its own.
fn run_with_timeout<T: Send + 'static>(
    repository: &str,
    timeout: Duration,
    op: impl FnOnce() -> ExtensionResult<T> + Send + 'static,
) -> Option<ExtensionResult<T>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(op());
    });
    match receiver.recv_timeout(timeout) {
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Err(ExtensionError::collect(
            repository,
            "repository call ended without a result",
        ))),
    }
}
