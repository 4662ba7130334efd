use std::io::Read;
use std::path::Path;

use extpack_core::{
    Extension, ExtensionDependency, ExtensionError, ExtensionId, ExtensionResult, RepositoryId,
};

mod bundled;
mod chain;
mod download;
mod filesystem;
mod http;
mod index;
mod memory;
mod source;

pub use bundled::CoreRepository;
pub use chain::RepositoryChain;
pub use download::write_verified_artifact;
pub use filesystem::FilesystemRepository;
pub use http::HttpRepository;
pub use memory::MemoryRepository;
pub use source::{
    RepositorySourceKind, RepositorySourceRecord, RepositorySourceStore, RESERVED_SOURCE_NAMES,
};

/// A source of extension descriptors and artifacts.
///
/// `versions` and `search` report `ExtensionError::Collect`; lookups report
/// `ExtensionError::Resolve`.
pub trait Repository: Send + Sync {
    fn id(&self) -> &RepositoryId;

    /// Every known release of `id`, newest first.
    fn versions(&self, id: &str) -> ExtensionResult<Vec<Extension>>;

    fn search(&self, needle: &str) -> ExtensionResult<Vec<String>>;

    fn open_artifact(&self, extension: &Extension) -> ExtensionResult<Box<dyn Read + Send>>;

    fn resolve(&self, id: &ExtensionId) -> ExtensionResult<Extension> {
        let versions = self
            .versions(&id.id)
            .map_err(|err| ExtensionError::resolve(id.to_string(), err.to_string()))?;
        versions
            .into_iter()
            .find(|extension| extension.id.version == id.version)
            .ok_or_else(|| {
                ExtensionError::resolve(
                    id.to_string(),
                    format!("not found in repository '{}'", self.id()),
                )
            })
    }

    /// Highest release matching the dependency's constraint.
    fn resolve_dependency(&self, dependency: &ExtensionDependency) -> ExtensionResult<Extension> {
        let versions = self
            .versions(&dependency.id)
            .map_err(|err| ExtensionError::resolve(dependency.to_string(), err.to_string()))?;
        versions
            .into_iter()
            .find(|extension| dependency.version_constraint.matches(&extension.id.version))
            .ok_or_else(|| {
                ExtensionError::resolve(
                    dependency.to_string(),
                    format!("no matching version in repository '{}'", self.id()),
                )
            })
    }

    /// Streams the artifact to `target`, verifying its size and digest.
    fn download(&self, extension: &Extension, target: &Path) -> ExtensionResult<u64> {
        let artifact = extension.artifact.as_ref().ok_or_else(|| {
            ExtensionError::collect(
                self.id().to_string(),
                format!("extension '{}' has no artifact", extension.id),
            )
        })?;
        let mut reader = self.open_artifact(extension)?;
        write_verified_artifact(&mut reader, artifact, target)
            .map_err(|err| ExtensionError::collect_from(self.id().to_string(), &err))
    }
}
