use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Identity of one extension release. Two ids are equal only when both the
/// id string and the version match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionId {
    pub id: String,
    pub version: Version,
}

impl ExtensionId {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let (id, version) = spec
            .trim()
            .split_once('@')
            .ok_or_else(|| anyhow!("extension id must use '<id>@<version>': {spec}"))?;
        validate_extension_id(id)?;
        let version = Version::parse(version.trim())
            .with_context(|| format!("invalid version for extension '{id}': {version}"))?;
        Ok(Self::new(id, version))
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

impl FromStr for ExtensionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub fn validate_extension_id(id: &str) -> anyhow::Result<()> {
    if id.is_empty() || id.len() > 128 {
        anyhow::bail!("invalid extension id: must be 1 to 128 characters");
    }

    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid extension id: '{id}'");
    };
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'));
    if !first.is_ascii_alphanumeric() || !rest_is_valid {
        anyhow::bail!("invalid extension id: '{id}'");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Core,
    Local,
    Remote,
}

impl RepositoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Names the repository an [`crate::Extension`] was resolved from. Remote
/// repositories are addressed by their source name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId {
    pub kind: RepositoryKind,
    pub name: String,
}

impl RepositoryId {
    pub fn core() -> Self {
        Self {
            kind: RepositoryKind::Core,
            name: "core".to_string(),
        }
    }

    pub fn local() -> Self {
        Self {
            kind: RepositoryKind::Local,
            name: "local".to_string(),
        }
    }

    pub fn remote(name: impl Into<String>) -> Self {
        Self {
            kind: RepositoryKind::Remote,
            name: name.into(),
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let (kind, name) = value
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid repository id: {value}"))?;
        let kind = match kind {
            "core" => RepositoryKind::Core,
            "local" => RepositoryKind::Local,
            "remote" => RepositoryKind::Remote,
            _ => return Err(anyhow!("invalid repository kind '{kind}' in '{value}'")),
        };
        if name.trim().is_empty() {
            return Err(anyhow!("repository name must not be empty: {value}"));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}
