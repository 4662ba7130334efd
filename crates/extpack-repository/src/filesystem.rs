use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use extpack_core::{Extension, ExtensionError, ExtensionResult, RepositoryId};
use extpack_security::{sha256_hex, SignatureVerifier};
use semver::Version;

use crate::index::{sort_newest_first, verify_descriptor, INDEX_DIR, PUBLIC_KEY_FILE};

/// A signed descriptor index on local disk:
/// `repository.pub` plus `index/<id>/<version>.toml` and `.toml.sig`.
#[derive(Debug, Clone)]
pub struct FilesystemRepository {
    id: RepositoryId,
    root: PathBuf,
    verifier: SignatureVerifier,
    fingerprint: String,
}

impl FilesystemRepository {
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let key_path = root.join(PUBLIC_KEY_FILE);
        let key_raw = fs::read(&key_path).with_context(|| {
            format!(
                "failed to read trusted repository key: {}",
                key_path.display()
            )
        })?;
        let key_hex = String::from_utf8(key_raw.clone())
            .with_context(|| format!("repository key is not valid UTF-8: {}", key_path.display()))?;
        let verifier = SignatureVerifier::from_hex(&key_hex)
            .with_context(|| format!("invalid repository key: {}", key_path.display()))?;

        Ok(Self {
            id: RepositoryId::remote(name),
            root,
            verifier,
            fingerprint: sha256_hex(&key_raw),
        })
    }

    /// Opens the repository and refuses it unless the key file hashes to
    /// `expected_fingerprint`.
    pub fn open_pinned(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        expected_fingerprint: &str,
    ) -> Result<Self> {
        let repository = Self::open(name, root)?;
        if !repository
            .fingerprint
            .eq_ignore_ascii_case(expected_fingerprint.trim())
        {
            return Err(anyhow!(
                "repository-fingerprint-mismatch: '{}' key fingerprint is {}, expected {}",
                repository.id.name,
                repository.fingerprint,
                expected_fingerprint
            ));
        }
        Ok(repository)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn load_versions(&self, id: &str) -> Result<Vec<Extension>> {
        let extension_dir = self.root.join(INDEX_DIR).join(id);
        if !extension_dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in fs::read_dir(&extension_dir)
            .with_context(|| format!("failed to read extension directory: {id}"))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("toml") {
                continue;
            }
            let expected_version = path
                .file_stem()
                .and_then(|v| v.to_str())
                .map(Version::parse)
                .transpose()
                .with_context(|| format!("descriptor file name is not a version: {}", path.display()))?;

            let descriptor_bytes = fs::read(&path)
                .with_context(|| format!("failed reading descriptor: {}", path.display()))?;
            let signature_path = path.with_extension("toml.sig");
            let signature_hex = fs::read_to_string(&signature_path).with_context(|| {
                format!(
                    "failed reading descriptor signature: {}",
                    signature_path.display()
                )
            })?;

            manifests.push(verify_descriptor(
                &self.verifier,
                descriptor_bytes,
                &signature_hex,
                id,
                expected_version.as_ref(),
                &path.display().to_string(),
            )?);
        }

        sort_newest_first(&mut manifests);
        Ok(manifests
            .into_iter()
            .map(|manifest| manifest.into_extension(self.id.clone()))
            .collect())
    }

    fn load_names(&self, needle: &str) -> Result<Vec<String>> {
        let index_root = self.root.join(INDEX_DIR);
        if !index_root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(index_root).context("failed to read repository index")? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.contains(needle) && !self.load_versions(&name)?.is_empty() {
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// `file://` URLs and absolute paths are used as is; anything else is
    /// relative to the repository root.
    fn artifact_path(&self, url: &str) -> PathBuf {
        if let Some(path) = url.strip_prefix("file://") {
            return PathBuf::from(path);
        }
        let path = Path::new(url);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl crate::Repository for FilesystemRepository {
    fn id(&self) -> &RepositoryId {
        &self.id
    }

    fn versions(&self, id: &str) -> ExtensionResult<Vec<Extension>> {
        self.load_versions(id)
            .map_err(|err| ExtensionError::collect_from(self.id.to_string(), &err))
    }

    fn search(&self, needle: &str) -> ExtensionResult<Vec<String>> {
        self.load_names(needle)
            .map_err(|err| ExtensionError::collect_from(self.id.to_string(), &err))
    }

    fn open_artifact(&self, extension: &Extension) -> ExtensionResult<Box<dyn Read + Send>> {
        let artifact = extension.artifact.as_ref().ok_or_else(|| {
            ExtensionError::collect(
                self.id.to_string(),
                format!("extension '{}' has no artifact", extension.id),
            )
        })?;
        let path = self.artifact_path(&artifact.url);
        let file = File::open(&path).map_err(|err| {
            ExtensionError::collect(
                self.id.to_string(),
                format!("failed opening artifact {}: {err}", path.display()),
            )
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}
