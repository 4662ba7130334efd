use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub fn parse_public_key_hex(public_key_hex: &str) -> Result<VerifyingKey> {
    let bytes =
        hex::decode(public_key_hex.trim()).context("failed to decode Ed25519 public key hex")?;
    let len = bytes.len();
    let array: [u8; 32] = bytes.try_into().map_err(|_| {
        anyhow!("invalid Ed25519 public key length: expected 32 bytes, got {len}")
    })?;
    VerifyingKey::from_bytes(&array).context("invalid Ed25519 public key bytes")
}

fn parse_signature_hex(signature_hex: &str) -> Result<Signature> {
    let bytes =
        hex::decode(signature_hex.trim()).context("failed to decode Ed25519 signature hex")?;
    let len = bytes.len();
    let array: [u8; 64] = bytes.try_into().map_err(|_| {
        anyhow!("invalid Ed25519 signature length: expected 64 bytes, got {len}")
    })?;
    Ok(Signature::from_bytes(&array))
}

pub fn verify_ed25519_signature_hex(
    payload: &[u8],
    public_key_hex: &str,
    signature_hex: &str,
) -> Result<bool> {
    SignatureVerifier::from_hex(public_key_hex)?.verify_hex(payload, signature_hex)
}

/// A repository key parsed once and reused for every descriptor it signs.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn from_hex(public_key_hex: &str) -> Result<Self> {
        Ok(Self {
            key: parse_public_key_hex(public_key_hex)?,
        })
    }

    /// `Ok(false)` for a well-formed signature that does not match; `Err`
    /// when the signature itself cannot be decoded.
    pub fn verify_hex(&self, payload: &[u8], signature_hex: &str) -> Result<bool> {
        let signature = parse_signature_hex(signature_hex)?;
        Ok(self.key.verify(payload, &signature).is_ok())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }
}
