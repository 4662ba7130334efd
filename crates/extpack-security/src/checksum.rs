use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hashes a stream to its end, returning the hex digest and byte count.
pub fn sha256_reader(reader: &mut dyn Read) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed reading stream for sha256")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Digests are compared case-insensitively; surrounding whitespace is ignored.
pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    digest_eq(&sha256_hex(bytes), expected_hex)
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<bool> {
    let file =
        File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let (actual, _) = sha256_reader(&mut BufReader::new(file))
        .with_context(|| format!("failed hashing {}", path.display()))?;
    Ok(digest_eq(&actual, expected_hex))
}

fn digest_eq(actual: &str, expected_hex: &str) -> bool {
    actual.eq_ignore_ascii_case(expected_hex.trim())
}

/// Writer adapter that hashes and counts everything written through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.written))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
