use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use extpack_core::ArchiveType;
use semver::Version;

const ROOT_NAMESPACE_DIR: &str = "_root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    prefix: PathBuf,
}

impl StoreLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("cache")
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.prefix.join("extensions")
    }

    pub fn config_path(&self) -> PathBuf {
        self.prefix.join("config.toml")
    }

    pub fn core_extensions_path(&self) -> PathBuf {
        self.prefix.join("core.toml")
    }

    pub fn artifacts_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("artifacts")
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.state_dir().join("installed")
    }

    pub fn record_dir(&self, id: &str) -> PathBuf {
        self.installed_state_dir().join(id)
    }

    pub fn record_path(&self, id: &str, version: &Version) -> PathBuf {
        self.record_dir(id).join(format!("{version}.record"))
    }

    pub fn record_lock_path(&self, id: &str, version: &Version) -> PathBuf {
        self.record_dir(id).join(format!("{version}.lock"))
    }

    pub fn artifact_cache_path(
        &self,
        id: &str,
        version: &Version,
        archive_type: ArchiveType,
    ) -> PathBuf {
        self.artifacts_cache_dir()
            .join(id)
            .join(version.to_string())
            .join(format!("artifact.{}", archive_type.as_str()))
    }

    /// Handler output directory; root installs live under `_root`.
    pub fn extension_install_dir(&self, namespace: Option<&str>, id: &str) -> PathBuf {
        self.extensions_dir()
            .join(namespace.unwrap_or(ROOT_NAMESPACE_DIR))
            .join(id)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.cache_dir(),
            self.artifacts_cache_dir(),
            self.installed_state_dir(),
            self.extensions_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if let Ok(prefix) = std::env::var("EXTPACK_PREFIX") {
        if !prefix.trim().is_empty() {
            return Ok(PathBuf::from(prefix));
        }
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user prefix")?;
        return Ok(PathBuf::from(app_data).join("Extpack"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user prefix")?;
    Ok(PathBuf::from(home).join(".extpack"))
}
