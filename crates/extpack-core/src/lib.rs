mod archive;
mod artifact;
mod error;
mod extension;
mod id;
mod manifest;

pub use archive::ArchiveType;
pub use artifact::ExtensionArtifact;
pub use error::{ExtensionError, ExtensionResult};
pub use extension::{
    namespace_label, validate_namespace, CoreExtension, Extension, ExtensionDependency,
    LocalExtension, ResolvedExtension,
};
pub use id::{validate_extension_id, ExtensionId, RepositoryId, RepositoryKind};
pub use manifest::ExtensionManifest;

#[cfg(test)]
mod tests;
