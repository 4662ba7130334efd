use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use extpack_core::ExtensionArtifact;
use extpack_security::DigestWriter;

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Copies `reader` into a part file next to `target`, checks the declared
/// size and sha256, then renames the part file over `target`. Every call
/// writes its own part file, so concurrent or abandoned downloads of the same
/// artifact never share one. The part file is removed on any failure.
pub fn write_verified_artifact(
    reader: &mut dyn Read,
    artifact: &ExtensionArtifact,
    target: &Path,
) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
    }

    let part_path = part_path_for(target);

    let result = copy_and_verify(reader, artifact, &part_path);
    let written = match result {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&part_path);
            return Err(err);
        }
    };

    if let Err(err) = fs::rename(&part_path, target) {
        let _ = fs::remove_file(&part_path);
        return Err(err).with_context(|| {
            format!(
                "failed to move downloaded artifact into cache: {}",
                target.display()
            )
        });
    }

    Ok(written)
}

fn part_path_for(target: &Path) -> PathBuf {
    let counter = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(
        "{}.{}-{}.part",
        target
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("artifact"),
        std::process::id(),
        counter
    ))
}

fn copy_and_verify(
    reader: &mut dyn Read,
    artifact: &ExtensionArtifact,
    part_path: &Path,
) -> Result<u64> {
    let file = File::create(part_path)
        .with_context(|| format!("failed creating {}", part_path.display()))?;
    let mut writer = DigestWriter::new(file);
    io::copy(reader, &mut writer)
        .with_context(|| format!("failed downloading artifact '{}'", artifact.url))?;
    let (file, digest, written) = writer
        .finish()
        .with_context(|| format!("failed flushing {}", part_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed syncing {}", part_path.display()))?;

    if let Some(expected) = artifact.size {
        if expected != written {
            return Err(anyhow!(
                "artifact size mismatch for '{}': expected {} bytes, got {}",
                artifact.url,
                expected,
                written
            ));
        }
    }
    if !digest.eq_ignore_ascii_case(artifact.sha256.trim()) {
        return Err(anyhow!(
            "artifact sha256 mismatch for '{}': expected {}, got {}",
            artifact.url,
            artifact.sha256,
            digest
        ));
    }

    Ok(written)
}
