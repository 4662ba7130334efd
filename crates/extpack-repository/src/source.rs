use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{FilesystemRepository, HttpRepository, RepositoryChain};

/// Names that always refer to the built-in repositories.
pub const RESERVED_SOURCE_NAMES: [&str; 2] = ["core", "local"];

const SOURCES_FILE: &str = "repositories.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositorySourceKind {
    Filesystem,
    Http,
}

impl RepositorySourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySourceRecord {
    pub name: String,
    pub kind: RepositorySourceKind,
    pub location: String,
    #[serde(alias = "fingerprint")]
    pub fingerprint_sha256: String,
    #[serde(default = "source_enabled_default")]
    pub enabled: bool,
    pub priority: u32,
}

fn source_enabled_default() -> bool {
    true
}

/// The persisted list of remote repositories (`repositories.toml`).
#[derive(Debug, Clone)]
pub struct RepositorySourceStore {
    state_root: PathBuf,
}

impl RepositorySourceStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn add_source(&self, source: RepositorySourceRecord) -> Result<()> {
        validate_source_name(&source.name)?;
        validate_source_fingerprint(&source.fingerprint_sha256)?;

        let mut state = self.load_state()?;
        if state
            .sources
            .iter()
            .any(|existing| existing.name == source.name)
        {
            anyhow::bail!("repository '{}' already exists", source.name);
        }

        state.sources.push(source);
        self.save_state(state)
    }

    pub fn list_sources(&self) -> Result<Vec<RepositorySourceRecord>> {
        Ok(self.load_state()?.sources)
    }

    pub fn remove_source(&self, name: &str) -> Result<()> {
        let mut state = self.load_state()?;
        let before = state.sources.len();
        state.sources.retain(|source| source.name != name);
        if state.sources.len() == before {
            anyhow::bail!("repository '{}' not found", name);
        }
        self.save_state(state)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut state = self.load_state()?;
        let source = state
            .sources
            .iter_mut()
            .find(|source| source.name == name)
            .ok_or_else(|| anyhow::anyhow!("repository '{}' not found", name))?;
        source.enabled = enabled;
        self.save_state(state)
    }

    /// Opens every enabled source in (priority, name) order. Each
    /// repository's key must match its recorded fingerprint.
    pub fn build_chain(&self, timeout: Duration) -> Result<RepositoryChain> {
        let chain = RepositoryChain::new();
        for source in self.load_state()?.sources {
            if !source.enabled {
                tracing::debug!(repository = %source.name, "skipping disabled repository");
                continue;
            }
            match source.kind {
                RepositorySourceKind::Filesystem => {
                    let repository = FilesystemRepository::open_pinned(
                        source.name.clone(),
                        &source.location,
                        &source.fingerprint_sha256,
                    )
                    .with_context(|| format!("failed opening repository '{}'", source.name))?;
                    chain.add_repository(Arc::new(repository));
                }
                RepositorySourceKind::Http => {
                    let repository = HttpRepository::open(
                        source.name.clone(),
                        &source.location,
                        timeout,
                        Some(&source.fingerprint_sha256),
                    )
                    .with_context(|| format!("failed opening repository '{}'", source.name))?;
                    chain.add_repository(Arc::new(repository));
                }
            }
        }
        Ok(chain)
    }

    fn sources_file_path(&self) -> PathBuf {
        self.state_root.join(SOURCES_FILE)
    }

    fn load_state(&self) -> Result<RepositorySourceStateFile> {
        let path = self.sources_file_path();
        if !path.exists() {
            return Ok(RepositorySourceStateFile::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading repository state: {}", path.display()))?;
        let mut state = parse_source_state_file(&content)
            .with_context(|| format!("failed parsing repository state: {}", path.display()))?;
        sort_sources(&mut state.sources);
        Ok(state)
    }

    fn save_state(&self, mut state: RepositorySourceStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).with_context(|| {
            format!(
                "failed creating repository state root: {}",
                self.state_root.display()
            )
        })?;

        let path = self.sources_file_path();
        sort_sources(&mut state.sources);
        let content = toml::to_string(&state)
            .with_context(|| format!("failed serializing repository state: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing repository state: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepositorySourceStateFile {
    #[serde(default = "state_file_version")]
    version: u32,
    #[serde(default)]
    sources: Vec<RepositorySourceRecord>,
}

impl Default for RepositorySourceStateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            sources: Vec::new(),
        }
    }
}

fn state_file_version() -> u32 {
    1
}

fn parse_source_state_file(content: &str) -> Result<RepositorySourceStateFile> {
    let state: RepositorySourceStateFile = toml::from_str(content)?;
    let expected = state_file_version();
    if state.version != expected {
        anyhow::bail!(
            "unsupported repository state version {} (expected {}): update {} to version {}",
            state.version,
            expected,
            SOURCES_FILE,
            expected
        );
    }

    let mut seen_names: HashSet<&str> = HashSet::with_capacity(state.sources.len());
    for source in &state.sources {
        validate_source_name(&source.name)?;
        validate_source_fingerprint(&source.fingerprint_sha256)?;
        if !seen_names.insert(source.name.as_str()) {
            anyhow::bail!(
                "duplicate repository name '{}' in {}: remove or rename one entry",
                source.name,
                SOURCES_FILE
            );
        }
    }

    Ok(state)
}

fn sort_sources(sources: &mut [RepositorySourceRecord]) {
    sources.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.name.cmp(&right.name))
    });
}

fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid repository name: must be 1 to 64 characters");
    }
    if RESERVED_SOURCE_NAMES.contains(&name) {
        anyhow::bail!("invalid repository name: '{name}' is reserved");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid repository name: '{name}'");
    };
    let first_is_valid = first.is_ascii_lowercase() || first.is_ascii_digit();
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!("invalid repository name: '{name}'");
    }

    Ok(())
}

fn validate_source_fingerprint(fingerprint: &str) -> Result<()> {
    if fingerprint.len() != 64 || !fingerprint.chars().all(|ch| ch.is_ascii_hexdigit()) {
        anyhow::bail!("invalid repository fingerprint: '{fingerprint}'");
    }
    Ok(())
}
