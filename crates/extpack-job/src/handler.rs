use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use extpack_core::{ArchiveType, Extension};
use extpack_store::StoreLayout;

/// Applies an extension of one type to a namespace. `artifact` is the
/// verified download, when the extension ships one.
pub trait ExtensionHandler: Send + Sync {
    fn install(
        &self,
        extension: &Extension,
        artifact: Option<&Path>,
        namespace: Option<&str>,
    ) -> Result<()>;

    fn uninstall(&self, extension: &Extension, namespace: Option<&str>) -> Result<()>;

    fn upgrade(
        &self,
        previous: &Extension,
        extension: &Extension,
        artifact: Option<&Path>,
        namespace: Option<&str>,
    ) -> Result<()> {
        self.uninstall(previous, namespace)?;
        self.install(extension, artifact, namespace)
    }
}

/// Handlers keyed by extension type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ExtensionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `file` handler.
    pub fn with_defaults(layout: StoreLayout) -> Self {
        let mut registry = Self::new();
        registry.register(
            FileExtensionHandler::TYPE,
            Arc::new(FileExtensionHandler::new(layout)),
        );
        registry
    }

    /// Replaces any handler already registered for `extension_type`.
    pub fn register(&mut self, extension_type: impl Into<String>, handler: Arc<dyn ExtensionHandler>) {
        self.handlers.insert(extension_type.into(), handler);
    }

    pub fn get(&self, extension_type: &str) -> Option<Arc<dyn ExtensionHandler>> {
        self.handlers.get(extension_type).cloned()
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Copies the artifact into `<prefix>/extensions/<namespace|_root>/<id>/`.
#[derive(Debug, Clone)]
pub struct FileExtensionHandler {
    layout: StoreLayout,
}

impl FileExtensionHandler {
    pub const TYPE: &'static str = "file";

    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }
}

impl ExtensionHandler for FileExtensionHandler {
    fn install(
        &self,
        extension: &Extension,
        artifact: Option<&Path>,
        namespace: Option<&str>,
    ) -> Result<()> {
        let install_dir = self
            .layout
            .extension_install_dir(namespace, &extension.id.id);
        if install_dir.exists() {
            fs::remove_dir_all(&install_dir).with_context(|| {
                format!("failed clearing install dir: {}", install_dir.display())
            })?;
        }
        fs::create_dir_all(&install_dir)
            .with_context(|| format!("failed creating install dir: {}", install_dir.display()))?;

        if let Some(artifact) = artifact {
            let target = install_dir.join(installed_file_name(extension));
            fs::copy(artifact, &target).with_context(|| {
                format!(
                    "failed copying artifact {} to {}",
                    artifact.display(),
                    target.display()
                )
            })?;
        }

        let marker = install_dir.join("version");
        fs::write(&marker, format!("{}\n", extension.id.version))
            .with_context(|| format!("failed writing {}", marker.display()))
    }

    fn uninstall(&self, extension: &Extension, namespace: Option<&str>) -> Result<()> {
        let install_dir = self
            .layout
            .extension_install_dir(namespace, &extension.id.id);
        if install_dir.exists() {
            fs::remove_dir_all(&install_dir).with_context(|| {
                format!("failed removing install dir: {}", install_dir.display())
            })?;
        }
        Ok(())
    }
}

/// `<id>-<version>.<archive suffix>` for containers; opaque single-file
/// artifacts keep the bare `<id>-<version>` name.
fn installed_file_name(extension: &Extension) -> String {
    let stem = format!("{}-{}", extension.id.id, extension.id.version);
    let archive_type = extension
        .artifact
        .as_ref()
        .and_then(|artifact| artifact.archive_type().ok())
        .unwrap_or(ArchiveType::Bin);
    if archive_type.is_archive() {
        format!("{stem}.{}", archive_type.as_str())
    } else {
        stem
    }
}
