use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signer, SigningKey};

use super::*;

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn public_key_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().to_bytes())
}

#[test]
fn sha256_hex_matches_known_digest() {
    assert_eq!(sha256_hex(b"abc"), ABC_SHA256);
    assert!(verify_sha256(b"abc", &ABC_SHA256.to_uppercase()));
    assert!(!verify_sha256(b"abd", ABC_SHA256));
}

#[test]
fn sha256_reader_counts_bytes() {
    let (digest, size) = sha256_reader(&mut Cursor::new(b"abc".to_vec())).expect("must hash");
    assert_eq!(digest, ABC_SHA256);
    assert_eq!(size, 3);
}

#[test]
fn verify_sha256_file_reads_from_disk() {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!("extpack-security-{}-{}", std::process::id(), nanos));
    fs::write(&path, b"abc").expect("must write fixture");

    assert!(verify_sha256_file(&path, ABC_SHA256).expect("must hash file"));
    assert!(!verify_sha256_file(&path, &sha256_hex(b"other")).expect("must hash file"));
    let _ = fs::remove_file(&path);

    let missing = PathBuf::from("/definitely/missing/extpack-artifact");
    let err = verify_sha256_file(&missing, ABC_SHA256).expect_err("must fail for missing file");
    assert!(err.to_string().contains("failed opening"));
}

#[test]
fn digest_writer_hashes_what_passes_through() {
    let mut writer = DigestWriter::new(Vec::new());
    writer.write_all(b"ab").expect("must write");
    writer.write_all(b"c").expect("must write");
    assert_eq!(writer.written(), 3);

    let (inner, digest, size) = writer.finish().expect("must finish");
    assert_eq!(inner, b"abc");
    assert_eq!(digest, ABC_SHA256);
    assert_eq!(size, 3);
}

#[test]
fn verifier_accepts_valid_descriptor_signature() {
    let key = signing_key();
    let payload = b"id = \"macros\"\nversion = \"1.0.0\"\n";
    let signature_hex = hex::encode(key.sign(payload).to_bytes());

    let verifier = SignatureVerifier::from_hex(&public_key_hex(&key)).expect("key must parse");
    assert!(verifier
        .verify_hex(payload, &signature_hex)
        .expect("verification must complete"));
    assert_eq!(verifier.public_key_bytes(), key.verifying_key().to_bytes());
}

#[test]
fn verifier_rejects_tampered_payload() {
    let key = signing_key();
    let signature_hex = hex::encode(key.sign(b"original").to_bytes());

    let verified = verify_ed25519_signature_hex(b"tampered", &public_key_hex(&key), &signature_hex)
        .expect("verification must complete");
    assert!(!verified);
}

#[test]
fn verifier_rejects_signature_from_other_key() {
    let other = SigningKey::from_bytes(&[9u8; 32]);
    let signature_hex = hex::encode(other.sign(b"payload").to_bytes());

    let verified =
        verify_ed25519_signature_hex(b"payload", &public_key_hex(&signing_key()), &signature_hex)
            .expect("verification must complete");
    assert!(!verified);
}

#[test]
fn verifier_errors_for_malformed_hex_or_length() {
    let key_hex = public_key_hex(&signing_key());
    assert!(verify_ed25519_signature_hex(b"", &key_hex, "zz").is_err());
    assert!(verify_ed25519_signature_hex(b"", &key_hex, "00").is_err());
    assert!(SignatureVerifier::from_hex("zz").is_err());

    let err = parse_public_key_hex("0011").expect_err("must reject short key");
    assert!(err.to_string().contains("expected 32 bytes, got 2"));
}
