use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Context, Result};
use extpack_core::{
    validate_extension_id, validate_namespace, Extension, ExtensionArtifact, ExtensionDependency,
    ExtensionId, LocalExtension, RepositoryId,
};
use semver::Version;

pub fn render_record(local: &LocalExtension) -> String {
    let extension = &local.extension;
    let mut payload = String::new();
    payload.push_str(&format!("id={}\n", extension.id.id));
    payload.push_str(&format!("version={}\n", extension.id.version));
    payload.push_str(&format!("type={}\n", extension.extension_type));
    payload.push_str(&format!("repository={}\n", extension.repository));
    for dependency in &extension.dependencies {
        let key = if dependency.optional {
            "optional_dependency"
        } else {
            "dependency"
        };
        payload.push_str(&format!("{key}={dependency}\n"));
    }
    for (key, value) in &extension.properties {
        payload.push_str(&format!("property={key}={value}\n"));
    }
    if let Some(artifact) = &extension.artifact {
        payload.push_str(&format!("artifact_url={}\n", artifact.url));
        payload.push_str(&format!("artifact_sha256={}\n", artifact.sha256));
        if let Some(size) = artifact.size {
            payload.push_str(&format!("artifact_size={size}\n"));
        }
        if let Some(archive) = &artifact.archive {
            payload.push_str(&format!("artifact_archive={archive}\n"));
        }
    }
    for namespace in &local.namespaces {
        payload.push_str(&format!("namespace={}\n", namespace.as_deref().unwrap_or("")));
    }
    for parent in &local.installed_as_dependency_of {
        payload.push_str(&format!("installed_as_dependency_of={parent}\n"));
    }
    payload.push_str(&format!("installed_at_unix={}\n", local.installed_at_unix));
    payload
}

/// Parses a `key=value` record. Unknown keys are ignored. A record without
/// any `namespace` line predates namespaces and counts as a root install.
pub fn parse_record(raw: &str) -> Result<LocalExtension> {
    let mut id = None;
    let mut version = None;
    let mut extension_type = None;
    let mut repository = None;
    let mut dependencies = Vec::new();
    let mut properties = BTreeMap::new();
    let mut artifact_url = None;
    let mut artifact_sha256 = None;
    let mut artifact_size = None;
    let mut artifact_archive = None;
    let mut namespaces = BTreeSet::new();
    let mut installed_as_dependency_of = BTreeSet::new();
    let mut installed_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "id" => id = Some(v.to_string()),
            "version" => {
                version = Some(
                    Version::parse(v).with_context(|| format!("invalid record version: {v}"))?,
                )
            }
            "type" => extension_type = Some(v.to_string()),
            "repository" => repository = Some(RepositoryId::parse(v)?),
            "dependency" => dependencies.push(ExtensionDependency::parse(v, false)?),
            "optional_dependency" => dependencies.push(ExtensionDependency::parse(v, true)?),
            "property" => {
                let (key, value) = v
                    .split_once('=')
                    .ok_or_else(|| anyhow!("property must use '<key>=<value>': {v}"))?;
                properties.insert(key.to_string(), value.to_string());
            }
            "artifact_url" => artifact_url = Some(v.to_string()),
            "artifact_sha256" => artifact_sha256 = Some(v.to_string()),
            "artifact_size" => {
                artifact_size = Some(v.parse().context("artifact_size must be u64")?)
            }
            "artifact_archive" => artifact_archive = Some(v.to_string()),
            "namespace" => {
                if v.is_empty() {
                    namespaces.insert(None);
                } else {
                    validate_namespace(v)?;
                    namespaces.insert(Some(v.to_string()));
                }
            }
            "installed_as_dependency_of" => {
                installed_as_dependency_of.insert(v.to_string());
            }
            "installed_at_unix" => {
                installed_at_unix = Some(v.parse().context("installed_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    let id = id.context("missing id")?;
    validate_extension_id(&id)?;
    let version = version.context("missing version")?;
    if namespaces.is_empty() {
        namespaces.insert(None);
    }

    let artifact = match (artifact_url, artifact_sha256) {
        (Some(url), Some(sha256)) => Some(ExtensionArtifact {
            url,
            sha256,
            size: artifact_size,
            archive: artifact_archive,
        }),
        (None, None) => None,
        _ => return Err(anyhow!("artifact_url and artifact_sha256 must appear together")),
    };

    Ok(LocalExtension {
        extension: Extension {
            id: ExtensionId::new(id, version),
            extension_type: extension_type.unwrap_or_else(|| "file".to_string()),
            repository: repository.unwrap_or_else(RepositoryId::local),
            dependencies,
            properties,
            artifact,
        },
        namespaces,
        installed_as_dependency_of,
        installed_at_unix: installed_at_unix.unwrap_or(0),
    })
}
