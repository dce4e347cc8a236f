//! Artifact encryption
//!
//! Encrypted artifacts use AES-256-GCM with the layout
//! `nonce(12) || tag(16) || ciphertext`, stored next to the original name
//! with an `.enc` suffix.

use crate::error::{Error, Result};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroize;

pub const ENCRYPTED_SUFFIX: &str = "enc";
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 256-bit artifact key, wiped from memory on drop
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Derive the key as a single SHA-256 of the passphrase.
    ///
    /// No salt and no work factor: existing encrypted backups were produced
    /// this way, so changing it needs a versioned format migration.
    pub fn derive(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Whether a file name carries the encrypted suffix
pub fn is_encrypted_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext == ENCRYPTED_SUFFIX)
        .unwrap_or(false)
}

fn encrypted_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NotFound(format!("Invalid artifact path: {}", path.display())))?;
    Ok(path.with_file_name(format!("{}.{}", name, ENCRYPTED_SUFFIX)))
}

fn plaintext_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NotFound(format!("Invalid artifact path: {}", path.display())))?;
    Ok(name
        .strip_suffix(&format!(".{}", ENCRYPTED_SUFFIX))
        .unwrap_or(name)
        .to_string())
}

/// Encrypt bytes into the artifact layout
pub fn encrypt_bytes(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), b"", &mut buffer)
        .map_err(|_| Error::Integrity {
            file: "<memory>".to_string(),
            reason: "encryption failed".to_string(),
        })?;

    let mut output = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&tag);
    output.extend_from_slice(&buffer);
    Ok(output)
}

/// Decrypt bytes in the artifact layout; `label` names the source in errors
pub fn decrypt_bytes(data: &[u8], key: &EncryptionKey, label: &str) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Decryption {
            file: label.to_string(),
        });
    }
    let (nonce, rest) = data.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut buffer = ciphertext.to_vec();
    key.cipher()
        .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer, Tag::from_slice(tag))
        .map_err(|_| Error::Decryption {
            file: label.to_string(),
        })?;
    Ok(buffer)
}

/// Encrypt a file in place: writes `<path>.enc` and removes the original
pub fn encrypt_file(path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
    let plaintext = fs::read(path)?;
    let encrypted = encrypt_bytes(&plaintext, key)?;
    let target = encrypted_path(path)?;

    fs::write(&target, encrypted)?;
    fs::remove_file(path)?;

    debug!("Encrypted {:?} -> {:?}", path, target);
    Ok(target)
}

/// Decrypt a `.enc` file into `dest_dir`, returning the plaintext path
pub fn decrypt_file_to(path: &Path, dest_dir: &Path, key: &EncryptionKey) -> Result<PathBuf> {
    let data = fs::read(path)?;
    let plaintext = decrypt_bytes(&data, key, &path.display().to_string())?;
    let target = dest_dir.join(plaintext_name(path)?);

    fs::write(&target, plaintext)?;

    debug!("Decrypted {:?} -> {:?}", path, target);
    Ok(target)
}

/// Decrypt a `.enc` file next to itself
pub fn decrypt_file(path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    decrypt_file_to(path, dir, key)
}
