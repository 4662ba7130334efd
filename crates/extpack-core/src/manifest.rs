use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::artifact::ExtensionArtifact;
use crate::extension::{Extension, ExtensionDependency};
use crate::id::{validate_extension_id, ExtensionId, RepositoryId};

fn default_extension_type() -> String {
    "file".to_string()
}

/// On-disk descriptor for one extension release, as published by a
/// repository index or listed in `core.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionManifest {
    pub id: String,
    pub version: Version,
    #[serde(rename = "type", default = "default_extension_type")]
    pub extension_type: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionReq>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, VersionReq>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub artifact: Option<ExtensionArtifact>,
}

impl ExtensionManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            toml::from_str(input).context("failed to parse extension descriptor")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_extension_id(&self.id)?;
        if self.extension_type.trim().is_empty() {
            return Err(anyhow!("extension '{}' has an empty type", self.id));
        }
        for name in self
            .dependencies
            .keys()
            .chain(self.optional_dependencies.keys())
        {
            validate_extension_id(name)
                .with_context(|| format!("invalid dependency of extension '{}'", self.id))?;
            if name == &self.id {
                return Err(anyhow!("extension '{}' depends on itself", self.id));
            }
        }
        if let Some(name) = self
            .dependencies
            .keys()
            .find(|name| self.optional_dependencies.contains_key(*name))
        {
            return Err(anyhow!(
                "extension '{}' lists '{}' as both a dependency and an optional dependency",
                self.id,
                name
            ));
        }
        Ok(())
    }

    pub fn extension_id(&self) -> ExtensionId {
        ExtensionId::new(self.id.clone(), self.version.clone())
    }

    pub fn into_extension(self, repository: RepositoryId) -> Extension {
        let mut dependencies = Vec::with_capacity(
            self.dependencies.len() + self.optional_dependencies.len(),
        );
        dependencies.extend(
            self.dependencies
                .into_iter()
                .map(|(id, req)| ExtensionDependency::new(id, req)),
        );
        dependencies.extend(
            self.optional_dependencies
                .into_iter()
                .map(|(id, req)| ExtensionDependency::optional(id, req)),
        );

        Extension {
            id: ExtensionId::new(self.id, self.version),
            extension_type: self.extension_type,
            repository,
            dependencies,
            properties: self.properties,
            artifact: self.artifact,
        }
    }
}
