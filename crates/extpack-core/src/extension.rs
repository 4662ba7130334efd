use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{anyhow, Context};
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::artifact::ExtensionArtifact;
use crate::id::{validate_extension_id, ExtensionId, RepositoryId};

const ROOT_NAMESPACE_LABEL: &str = "<root>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDependency {
    pub id: String,
    pub version_constraint: VersionReq,
    #[serde(default)]
    pub optional: bool,
}

impl ExtensionDependency {
    pub fn new(id: impl Into<String>, version_constraint: VersionReq) -> Self {
        Self {
            id: id.into(),
            version_constraint,
            optional: false,
        }
    }

    pub fn optional(id: impl Into<String>, version_constraint: VersionReq) -> Self {
        Self {
            optional: true,
            ..Self::new(id, version_constraint)
        }
    }

    pub fn matches(&self, candidate: &ExtensionId) -> bool {
        self.id == candidate.id && self.version_constraint.matches(&candidate.version)
    }

    /// Parses the `<id>@<requirement>` form used in local records.
    pub fn parse(spec: &str, optional: bool) -> anyhow::Result<Self> {
        let (id, requirement) = match spec.split_once('@') {
            Some((id, requirement)) => (id, requirement),
            None => (spec, "*"),
        };
        validate_extension_id(id)?;
        let version_constraint = VersionReq::parse(requirement)
            .with_context(|| format!("invalid version constraint for '{id}': {requirement}"))?;
        Ok(Self {
            id: id.to_string(),
            version_constraint,
            optional,
        })
    }
}

impl fmt::Display for ExtensionDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version_constraint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub id: ExtensionId,
    #[serde(rename = "type")]
    pub extension_type: String,
    pub repository: RepositoryId,
    pub dependencies: Vec<ExtensionDependency>,
    pub properties: BTreeMap<String, String>,
    pub artifact: Option<ExtensionArtifact>,
}

impl Extension {
    pub fn new(
        id: ExtensionId,
        extension_type: impl Into<String>,
        repository: RepositoryId,
    ) -> Self {
        Self {
            id,
            extension_type: extension_type.into(),
            repository,
            dependencies: Vec::new(),
            properties: BTreeMap::new(),
            artifact: None,
        }
    }

    pub fn with_dependency(mut self, dependency: ExtensionDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, artifact: ExtensionArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|dependency| dependency.id == id)
    }
}

/// An extension bundled with the running instance. Always satisfied, never
/// installed or uninstalled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreExtension {
    extension: Extension,
}

impl CoreExtension {
    pub fn new(mut extension: Extension) -> Self {
        extension.repository = RepositoryId::core();
        Self { extension }
    }

    pub fn extension(&self) -> &Extension {
        &self.extension
    }

    pub fn id(&self) -> &ExtensionId {
        &self.extension.id
    }
}

/// An extension recorded by the local store.
///
/// `namespaces` holds `None` for a root install, which applies to every
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalExtension {
    pub extension: Extension,
    pub namespaces: BTreeSet<Option<String>>,
    pub installed_as_dependency_of: BTreeSet<String>,
    pub installed_at_unix: u64,
}

impl LocalExtension {
    pub fn id(&self) -> &ExtensionId {
        &self.extension.id
    }

    pub fn is_installed_at_root(&self) -> bool {
        self.namespaces.contains(&None)
    }

    /// Exact namespace membership, without the root fallback.
    pub fn is_installed_in(&self, namespace: Option<&str>) -> bool {
        self.namespaces.contains(&namespace.map(ToOwned::to_owned))
    }

    pub fn satisfies_namespace(&self, namespace: Option<&str>) -> bool {
        self.is_installed_at_root() || self.is_installed_in(namespace)
    }

    pub fn is_dependency(&self) -> bool {
        !self.installed_as_dependency_of.is_empty()
    }

    pub fn named_namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().filter_map(|namespace| namespace.as_deref())
    }
}

/// The extension a plan action refers to, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ResolvedExtension {
    Core(CoreExtension),
    Local(LocalExtension),
    Remote(Extension),
}

impl ResolvedExtension {
    pub fn extension(&self) -> &Extension {
        match self {
            Self::Core(core) => core.extension(),
            Self::Local(local) => &local.extension,
            Self::Remote(extension) => extension,
        }
    }

    pub fn id(&self) -> &ExtensionId {
        &self.extension().id
    }

    pub fn is_core(&self) -> bool {
        matches!(self, Self::Core(_))
    }

    pub fn as_local(&self) -> Option<&LocalExtension> {
        match self {
            Self::Local(local) => Some(local),
            _ => None,
        }
    }
}

pub fn validate_namespace(namespace: &str) -> anyhow::Result<()> {
    if namespace.is_empty() || namespace.len() > 64 {
        return Err(anyhow!(
            "invalid namespace: must be 1 to 64 characters, got '{namespace}'"
        ));
    }
    if !namespace
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'))
    {
        return Err(anyhow!("invalid namespace: '{namespace}'"));
    }
    Ok(())
}

pub fn namespace_label(namespace: Option<&str>) -> &str {
    namespace.unwrap_or(ROOT_NAMESPACE_LABEL)
}
