use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::RwLock;

use extpack_core::{Extension, ExtensionError, ExtensionId, ExtensionResult, RepositoryId};
use semver::Version;

/// Remote repository held entirely in memory, for embedding and tests.
#[derive(Debug)]
pub struct MemoryRepository {
    id: RepositoryId,
    extensions: RwLock<BTreeMap<String, BTreeMap<Version, Extension>>>,
    artifacts: RwLock<HashMap<ExtensionId, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RepositoryId::remote(name),
            extensions: RwLock::new(BTreeMap::new()),
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a release. The stored copy is re-owned by this repository.
    pub fn add(&self, mut extension: Extension) {
        extension.repository = self.id.clone();
        let mut extensions = self
            .extensions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        extensions
            .entry(extension.id.id.clone())
            .or_default()
            .insert(extension.id.version.clone(), extension);
    }

    pub fn add_with_artifact(&self, extension: Extension, bytes: Vec<u8>) {
        let id = extension.id.clone();
        self.add(extension);
        self.artifacts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, bytes);
    }

    pub fn remove(&self, id: &ExtensionId) -> bool {
        let mut extensions = self
            .extensions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(versions) = extensions.get_mut(&id.id) else {
            return false;
        };
        let removed = versions.remove(&id.version).is_some();
        if versions.is_empty() {
            extensions.remove(&id.id);
        }
        removed
    }
}

impl super::Repository for MemoryRepository {
    fn id(&self) -> &RepositoryId {
        &self.id
    }

    fn versions(&self, id: &str) -> ExtensionResult<Vec<Extension>> {
        let extensions = self
            .extensions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(extensions
            .get(id)
            .map(|versions| versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn search(&self, needle: &str) -> ExtensionResult<Vec<String>> {
        let extensions = self
            .extensions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(extensions
            .keys()
            .filter(|name| name.contains(needle))
            .cloned()
            .collect())
    }

    fn open_artifact(&self, extension: &Extension) -> ExtensionResult<Box<dyn Read + Send>> {
        let artifacts = self
            .artifacts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bytes = artifacts.get(&extension.id).cloned().ok_or_else(|| {
            ExtensionError::collect(
                self.id.to_string(),
                format!("no artifact stored for '{}'", extension.id),
            )
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}
