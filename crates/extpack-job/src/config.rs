use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_VERSION: u32 = 1;

/// Engine settings read from `<prefix>/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,
    pub workers: usize,
    pub remote_timeout_secs: u64,
    pub root_modifications_allowed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FILE_VERSION,
            workers: 2,
            remote_timeout_secs: 30,
            root_modifications_allowed: false,
        }
    }
}

impl EngineConfig {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading engine config: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed parsing engine config: {}", path.display()))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        if config.version != CONFIG_FILE_VERSION {
            anyhow::bail!(
                "unsupported config version {} (expected {})",
                config.version,
                CONFIG_FILE_VERSION
            );
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("failed serializing engine config")
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}
