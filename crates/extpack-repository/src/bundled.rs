use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use extpack_core::{CoreExtension, ExtensionManifest, RepositoryId};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct CoreExtensionsFile {
    #[serde(default)]
    extensions: Vec<ExtensionManifest>,
}

/// Extensions bundled with the running instance. Built once; never changes.
#[derive(Debug, Clone, Default)]
pub struct CoreRepository {
    extensions: BTreeMap<String, CoreExtension>,
}

impl CoreRepository {
    pub fn new(extensions: impl IntoIterator<Item = CoreExtension>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|core| (core.id().id.clone(), core))
                .collect(),
        }
    }

    /// Parses a `core.toml` document made of `[[extensions]]` descriptors.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: CoreExtensionsFile =
            toml::from_str(input).context("failed parsing core extension list")?;
        let mut extensions = Vec::with_capacity(file.extensions.len());
        let mut seen = BTreeSet::new();
        for manifest in file.extensions {
            manifest.validate()?;
            if !seen.insert(manifest.id.clone()) {
                return Err(anyhow!(
                    "core extension '{}' is listed more than once",
                    manifest.id
                ));
            }
            extensions.push(CoreExtension::new(
                manifest.into_extension(RepositoryId::core()),
            ));
        }
        Ok(Self::new(extensions))
    }

    /// Missing file means no core extensions.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .with_context(|| format!("failed loading core extensions: {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err)
                .with_context(|| format!("failed reading core extensions: {}", path.display())),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CoreExtension> {
        self.extensions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.extensions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreExtension> {
        self.extensions.values()
    }
}
