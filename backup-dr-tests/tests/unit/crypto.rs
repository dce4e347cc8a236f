//! Unit tests for artifact encryption and manifest sealing

use backup_dr::error::Error;
use backup_dr::utils::crypto::{self, EncryptionKey, NONCE_LEN, TAG_LEN};
use backup_dr::utils::manifest::{self, MANIFEST_FILE, SIDECAR_FILE};
use rstest::rstest;
use std::fs;
use test_utils::{flip_bit, write_sealed_backup, TestContext};

#[rstest]
#[case::empty(b"")]
#[case::short(b"x")]
#[case::dump(b"PGDMP\x01\x0e\x00 custom archive body")]
fn test_decrypt_inverts_encrypt(#[case] plaintext: &[u8]) {
    let key = EncryptionKey::derive("correct horse battery staple");
    let sealed = crypto::encrypt_bytes(plaintext, &key).unwrap();
    assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN + plaintext.len());
    assert_eq!(crypto::decrypt_bytes(&sealed, &key, "artifact").unwrap(), plaintext);
}

#[test]
fn test_nonce_differs_between_encryptions() {
    let key = EncryptionKey::derive("passphrase");
    let a = crypto::encrypt_bytes(b"same", &key).unwrap();
    let b = crypto::encrypt_bytes(b"same", &key).unwrap();
    assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
}

#[test]
fn test_wrong_passphrase_is_a_decryption_error() {
    let sealed = crypto::encrypt_bytes(b"secret rows", &EncryptionKey::derive("right")).unwrap();
    let err = crypto::decrypt_bytes(&sealed, &EncryptionKey::derive("wrong"), "database.dump.enc").unwrap_err();
    assert!(matches!(err, Error::Decryption { ref file } if file == "database.dump.enc"));
}

#[test]
fn test_truncated_ciphertext_is_rejected() {
    let key = EncryptionKey::derive("k");
    let err = crypto::decrypt_bytes(&[0u8; NONCE_LEN + TAG_LEN - 1], &key, "redis.json.enc").unwrap_err();
    assert!(matches!(err, Error::Decryption { .. }));
}

#[test]
fn test_encrypted_file_replaces_plaintext() {
    let ctx = TestContext::new();
    let path = ctx.create_file("redis.json", r#"{"keys":[]}"#);
    let key = EncryptionKey::derive("k");

    let sealed = crypto::encrypt_file(&path, &key).unwrap();
    assert!(!path.exists());
    assert_eq!(sealed.file_name().unwrap(), "redis.json.enc");
    assert!(crypto::is_encrypted_name("redis.json.enc"));
    assert!(!crypto::is_encrypted_name("redis.json"));

    let out = ctx.create_subdir("plain");
    let restored = crypto::decrypt_file_to(&sealed, &out, &key).unwrap();
    assert_eq!(restored, out.join("redis.json"));
    assert_eq!(fs::read_to_string(restored).unwrap(), r#"{"keys":[]}"#);
}

#[test]
fn test_sidecar_hash_matches_manifest() {
    let ctx = TestContext::new();
    let dir = ctx.temp_dir().join("b1");
    write_sealed_backup(&dir, "b1", &[("database.dump", b"rows"), ("redis.json", b"{}")]).unwrap();

    let sidecar = fs::read_to_string(dir.join(SIDECAR_FILE)).unwrap();
    let expected = manifest::sha256_file(&dir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(sidecar, format!("{}  {}\n", expected, MANIFEST_FILE));
}

#[test]
fn test_flipped_artifact_bit_names_the_file() {
    let ctx = TestContext::new();
    let dir = ctx.temp_dir().join("b1");
    write_sealed_backup(&dir, "b1", &[("database.dump", b"rows"), ("redis.json", b"{}")]).unwrap();

    flip_bit(&dir.join("redis.json"), 1).unwrap();

    let err = manifest::verify_manifest(&dir).unwrap_err();
    assert!(matches!(err, Error::Integrity { ref file, .. } if file == "redis.json"));
}

#[test]
fn test_edited_manifest_is_detected() {
    let ctx = TestContext::new();
    let dir = ctx.temp_dir().join("b1");
    write_sealed_backup(&dir, "b1", &[("database.dump", b"rows")]).unwrap();

    let edited = fs::read_to_string(dir.join(MANIFEST_FILE))
        .unwrap()
        .replace("\"b1\"", "\"b2\"");
    fs::write(dir.join(MANIFEST_FILE), edited).unwrap();

    let err = manifest::verify_manifest(&dir).unwrap_err();
    assert!(matches!(err, Error::Integrity { ref file, .. } if file == MANIFEST_FILE));
}
