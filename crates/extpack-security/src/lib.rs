mod checksum;
mod ed25519;

pub use checksum::{sha256_hex, sha256_reader, verify_sha256, verify_sha256_file, DigestWriter};
pub use ed25519::{parse_public_key_hex, verify_ed25519_signature_hex, SignatureVerifier};

#[cfg(test)]
mod tests;
