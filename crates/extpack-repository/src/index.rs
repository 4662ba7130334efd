use anyhow::{Context, Result};
use extpack_core::ExtensionManifest;
use extpack_security::SignatureVerifier;
use semver::Version;

pub(crate) const PUBLIC_KEY_FILE: &str = "repository.pub";
pub(crate) const INDEX_DIR: &str = "index";

/// Checks a descriptor's detached signature, parses it, and confirms it
/// lives at the index path for its own id and version.
pub(crate) fn verify_descriptor(
    verifier: &SignatureVerifier,
    descriptor_bytes: Vec<u8>,
    signature_hex: &str,
    expected_id: &str,
    expected_version: Option<&Version>,
    location: &str,
) -> Result<ExtensionManifest> {
    let key_identifier: String = hex_prefix(&verifier.public_key_bytes());
    let signature_is_valid = verifier
        .verify_hex(&descriptor_bytes, signature_hex.trim())
        .with_context(|| {
            format!("failed verifying descriptor signature for key {key_identifier}: {location}")
        })?;
    if !signature_is_valid {
        anyhow::bail!("invalid descriptor signature for key {key_identifier}: {location}");
    }

    let content = String::from_utf8(descriptor_bytes)
        .with_context(|| format!("descriptor is not valid UTF-8: {location}"))?;
    let manifest = ExtensionManifest::from_toml_str(&content)
        .with_context(|| format!("failed parsing descriptor: {location}"))?;

    if manifest.id != expected_id {
        anyhow::bail!(
            "descriptor {location} declares id '{}' but is indexed under '{expected_id}'",
            manifest.id
        );
    }
    if let Some(expected_version) = expected_version {
        if &manifest.version != expected_version {
            anyhow::bail!(
                "descriptor {location} declares version {} but is indexed as {expected_version}",
                manifest.version
            );
        }
    }

    Ok(manifest)
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|byte| format!("{byte:02x}")).collect()
}

pub(crate) fn sort_newest_first(manifests: &mut [ExtensionManifest]) {
    manifests.sort_by(|a, b| b.version.cmp(&a.version));
}
