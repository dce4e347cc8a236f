//! Backup manifest and tamper-evident sidecar
//!
//! The chain is: artifact hash -> `manifest.json` -> `manifest.sha256`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIDECAR_FILE: &str = "manifest.sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

impl BackupManifest {
    /// Total size of all listed artifacts
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn file(&self, name: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Streaming SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hash and size every artifact; names are taken relative to their directory
pub fn build_manifest(id: &str, files: &[PathBuf], encrypted: bool) -> Result<BackupManifest> {
    let mut entries = Vec::with_capacity(files.len());

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Integrity {
                file: path.display().to_string(),
                reason: "artifact name is not valid UTF-8".to_string(),
            })?
            .to_string();
        let size = fs::metadata(path)?.len();
        let sha256 = sha256_file(path)?;
        debug!("Hashed {} ({} bytes): {}", name, size, sha256);
        entries.push(ManifestFile { name, size, sha256 });
    }

    Ok(BackupManifest {
        id: id.to_string(),
        created_at: Utc::now(),
        encrypted,
        files: entries,
    })
}

/// Write `manifest.json` and its checksum sidecar; returns the manifest hash
pub fn write_manifest_sidecar(dir: &Path, manifest: &BackupManifest) -> Result<String> {
    let manifest_path = dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, serde_json::to_vec_pretty(manifest)?)?;

    let digest = sha256_file(&manifest_path)?;
    fs::write(
        dir.join(SIDECAR_FILE),
        format!("{}  {}\n", digest, MANIFEST_FILE),
    )?;

    info!("Wrote manifest for {} ({} files)", manifest.id, manifest.files.len());
    Ok(digest)
}

/// Parse a `<hex>  manifest.json` sidecar line
fn read_sidecar(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)?;
    let mut parts = content.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(hash), Some(MANIFEST_FILE)) if hash.len() == 64 => Ok(hash.to_lowercase()),
        _ => Err(Error::Integrity {
            file: SIDECAR_FILE.to_string(),
            reason: "malformed checksum sidecar".to_string(),
        }),
    }
}

/// Load and check a backup's manifest against the files on disk.
///
/// The manifest is checked against its sidecar first, then every file.
/// Fails on a missing sidecar or the first missing or mismatching file.
pub fn verify_manifest(dir: &Path) -> Result<BackupManifest> {
    verify_manifest_with(dir, false)
}

/// Like [`verify_manifest`], optionally accepting a backup without sidecar
pub fn verify_manifest_with(dir: &Path, allow_missing_sidecar: bool) -> Result<BackupManifest> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(Error::Integrity {
            file: MANIFEST_FILE.to_string(),
            reason: format!("manifest not found in {}", dir.display()),
        });
    }

    let sidecar_path = dir.join(SIDECAR_FILE);
    if sidecar_path.is_file() {
        let expected = read_sidecar(&sidecar_path)?;
        let actual = sha256_file(&manifest_path)?;
        if expected != actual {
            return Err(Error::Integrity {
                file: MANIFEST_FILE.to_string(),
                reason: format!("manifest hash {} does not match sidecar {}", actual, expected),
            });
        }
    } else if allow_missing_sidecar {
        tracing::warn!("No {} in {}, manifest itself is unchecked", SIDECAR_FILE, dir.display());
    } else {
        return Err(Error::Integrity {
            file: SIDECAR_FILE.to_string(),
            reason: format!("checksum sidecar not found in {}", dir.display()),
        });
    }

    let manifest: BackupManifest =
        serde_json::from_slice(&fs::read(&manifest_path)?).map_err(|e| Error::Integrity {
            file: MANIFEST_FILE.to_string(),
            reason: format!("unreadable manifest: {}", e),
        })?;

    for entry in &manifest.files {
        if entry.name.contains('/') || entry.name.contains('\\') || entry.name == ".." {
            return Err(Error::Integrity {
                file: entry.name.clone(),
                reason: "artifact name escapes the backup directory".to_string(),
            });
        }
        let path = dir.join(&entry.name);
        if !path.is_file() {
            return Err(Error::Integrity {
                file: entry.name.clone(),
                reason: "file is missing".to_string(),
            });
        }
        let size = fs::metadata(&path)?.len();
        if size != entry.size {
            return Err(Error::Integrity {
                file: entry.name.clone(),
                reason: format!("size {} does not match recorded {}", size, entry.size),
            });
        }
        let actual = sha256_file(&path)?;
        if actual != entry.sha256 {
            return Err(Error::Integrity {
                file: entry.name.clone(),
                reason: format!("sha256 {} does not match recorded {}", actual, entry.sha256),
            });
        }
    }

    info!("Verified manifest {} ({} files)", manifest.id, manifest.files.len());
    Ok(manifest)
}
