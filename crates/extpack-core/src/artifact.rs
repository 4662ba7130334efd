use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionArtifact {
    pub url: String,
    pub sha256: String,
    pub size: Option<u64>,
    pub archive: Option<String>,
}

impl ExtensionArtifact {
    pub fn archive_type(&self) -> anyhow::Result<ArchiveType> {
        if let Some(archive) = &self.archive {
            return ArchiveType::parse(archive).ok_or_else(|| {
                anyhow!(
                    "unsupported archive type '{archive}' for artifact '{}'; supported: jar, zip, xar, tar.gz, tar.zst, bin",
                    self.url
                )
            });
        }

        ArchiveType::infer_from_url(&self.url).ok_or_else(|| {
            anyhow!(
                "could not infer archive type from URL '{}'; set artifact.archive explicitly",
                self.url
            )
        })
    }
}
