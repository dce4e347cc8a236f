//! Backup orchestration
//!
//! One run produces a uniquely named directory holding the relational dump,
//! the optional key-value export and storage snapshot, the manifest and its
//! sidecar. The "last backup" pointer is updated only after all of them are
//! written.

use crate::config::{control_plane_path, BackupConfig, ConfigError, GlobalConfig};
use crate::error::{Error, Result, StepContext};
use crate::managers::retention::RetentionSweeper;
use crate::store::{BackupPointer, FleetStore, SqliteFleetStore};
use crate::utils::crypto::{self, EncryptionKey};
use crate::utils::manifest::{self, BackupManifest};
use crate::utils::storage_ops::{self, StorageSnapshot};
use crate::utils::{DatabaseOperations, KeyValueOperations, ObjectStorageOperations};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub const DATABASE_ARTIFACT: &str = "database.dump";
pub const REDIS_ARTIFACT: &str = "redis.json";
pub const STORAGE_ARTIFACT: &str = "storage.json";

const TOTAL_STEPS: usize = 8;

/// Contents of `redis.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisExport {
    pub exported_at: DateTime<Utc>,
    pub keys: Vec<RedisEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisEntry {
    pub key: String,
    /// Remaining TTL in milliseconds, -1 when the key never expires
    pub ttl: i64,
    /// Serialized value (DUMP format), base64
    pub value: String,
}

/// Result of a successful backup run
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub backup_id: String,
    pub directory: PathBuf,
    pub manifest: BackupManifest,
    pub pointer: BackupPointer,
}

fn log_step(step: usize, message: &str) {
    info!("[backup {}/{}] {}", step, TOTAL_STEPS, message);
}

/// `<YYYYMMDDTHHMMSSmmmZ>-<8 hex>`
pub fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
}

/// Ensure the external tools a backup needs are on PATH
pub fn check_required_tools(config: &BackupConfig) -> Result<()> {
    let mut tools = vec!["pg_dump"];
    if config.effective_redis_url().is_some() {
        tools.push("redis-cli");
    }
    for tool in tools {
        which::which(tool).map_err(|_| {
            ConfigError::ValidationError(format!("Required tool '{}' was not found on PATH", tool))
        })?;
    }
    Ok(())
}

/// Read the pointer file, `None` when it does not exist yet
pub fn read_pointer_file(path: &Path) -> Result<Option<BackupPointer>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&content)?))
}

/// Replace the pointer file via a temporary sibling and rename
pub fn write_pointer_file(path: &Path, pointer: &BackupPointer) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::write(&tmp, serde_json::to_vec_pretty(pointer)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub struct BackupOrchestrator {
    global: GlobalConfig,
    config: BackupConfig,
    database: Arc<dyn DatabaseOperations>,
    key_value: Arc<dyn KeyValueOperations>,
    storage: Option<Arc<dyn ObjectStorageOperations>>,
}

impl BackupOrchestrator {
    pub fn new(
        global: GlobalConfig,
        config: BackupConfig,
        database: Arc<dyn DatabaseOperations>,
        key_value: Arc<dyn KeyValueOperations>,
    ) -> Self {
        Self {
            global,
            config,
            database,
            key_value,
            storage: None,
        }
    }

    /// Object storage client used for the metadata snapshot
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorageOperations>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Run a full backup. Retention runs afterwards whatever the outcome;
    /// a sweep error after a failed run is only logged.
    pub fn run(&self) -> Result<BackupOutcome> {
        let result = self.run_steps();

        log_step(8, "applying retention");
        let sweep = RetentionSweeper::new(self.config.retention)
            .sweep(&self.global.output_dir, SystemTime::now());

        match (result, sweep) {
            (Ok(outcome), Ok(_)) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e.at_step("apply retention")),
            (Err(e), Err(sweep_err)) => {
                warn!("Retention sweep after failed backup also failed: {}", sweep_err);
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
        }
    }

    fn run_steps(&self) -> Result<BackupOutcome> {
        let timeout = self.global.command_timeout;
        let backup_id = new_backup_id(Utc::now());

        log_step(1, &format!("creating backup directory {}", backup_id));
        fs::create_dir_all(&self.global.output_dir).step("create backup directory")?;
        let dir = self.global.backup_dir(&backup_id);
        fs::create_dir(&dir).step("create backup directory")?;

        let mut artifacts = Vec::new();

        log_step(2, "dumping relational store");
        let dump_path = dir.join(DATABASE_ARTIFACT);
        self.database
            .dump(&self.config.database_url, &dump_path, timeout)
            .step("dump relational store")?;
        artifacts.push(dump_path);

        match self.config.effective_redis_url() {
            Some(url) => {
                log_step(3, "exporting key-value store");
                let path = dir.join(REDIS_ARTIFACT);
                let export = self.export_key_value(url).step("export key-value store")?;
                fs::write(&path, serde_json::to_vec(&export)?).step("export key-value store")?;
                artifacts.push(path);
            }
            None => log_step(3, "key-value export skipped"),
        }

        let bucket = match (self.config.effective_storage(), &self.storage) {
            (Some(storage_config), Some(storage)) => {
                log_step(4, &format!("snapshotting storage metadata of {}", storage_config.bucket));
                let objects = storage_ops::list_all_objects(storage.as_ref(), &storage_config.bucket)
                    .step("snapshot storage metadata")?;
                let snapshot = StorageSnapshot {
                    bucket: storage_config.bucket.clone(),
                    exported_at: Utc::now(),
                    objects,
                };
                let path = dir.join(STORAGE_ARTIFACT);
                fs::write(&path, serde_json::to_vec(&snapshot)?).step("snapshot storage metadata")?;
                artifacts.push(path);
                Some(storage_config.bucket.clone())
            }
            (Some(_), None) => {
                warn!("Storage is configured but no storage client is available, skipping snapshot");
                None
            }
            (None, _) => {
                log_step(4, "storage snapshot skipped");
                None
            }
        };

        let encrypted = match self.global.encryption_passphrase {
            Some(ref passphrase) => {
                log_step(5, "encrypting artifacts");
                let key = EncryptionKey::derive(passphrase);
                artifacts = artifacts
                    .iter()
                    .map(|path| crypto::encrypt_file(path, &key))
                    .collect::<Result<Vec<_>>>()
                    .step("encrypt artifacts")?;
                true
            }
            None => {
                log_step(5, "encryption disabled");
                false
            }
        };

        log_step(6, "writing manifest");
        let manifest = manifest::build_manifest(&backup_id, &artifacts, encrypted).step("write manifest")?;
        let checksum = manifest::write_manifest_sidecar(&dir, &manifest).step("write manifest")?;

        log_step(7, "recording last backup");
        // Fleet rows are read from other working directories
        let absolute_dir = dir.canonicalize().step("record last backup")?;
        let pointer = BackupPointer {
            id: uuid::Uuid::new_v4().to_string(),
            backup_id: backup_id.clone(),
            instance_id: self.global.instance_id.clone(),
            created_at: manifest.created_at,
            last_backup_at: Utc::now(),
            size_bytes: manifest.total_size(),
            checksum,
            bucket,
            path: absolute_dir.display().to_string(),
        };
        write_pointer_file(&self.global.pointer_file, &pointer).step("record last backup")?;
        if let Some(ref url) = self.global.control_plane_url {
            let store = SqliteFleetStore::open(&control_plane_path(url)).step("record last backup")?;
            store.record_backup(&pointer).step("record last backup")?;
        }

        info!(
            "Backup {} complete: {} file(s), {} bytes",
            backup_id,
            manifest.files.len(),
            manifest.total_size()
        );

        Ok(BackupOutcome {
            backup_id,
            directory: dir,
            manifest,
            pointer,
        })
    }

    fn export_key_value(&self, url: &str) -> Result<RedisExport> {
        let timeout = self.global.command_timeout;
        let keys = self.key_value.scan_keys(url, timeout)?;
        let mut entries = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(payload) = self.key_value.dump_key(url, &key, timeout)? else {
                debug!("Key {} vanished before DUMP, skipping", key);
                continue;
            };
            let ttl = self.key_value.pttl(url, &key, timeout)?;
            if ttl == -2 {
                debug!("Key {} expired during export, skipping", key);
                continue;
            }
            entries.push(RedisEntry {
                key,
                ttl,
                value: BASE64.encode(payload),
            });
        }

        info!("Exported {} key(s)", entries.len());
        Ok(RedisExport {
            exported_at: Utc::now(),
            keys: entries,
        })
    }
}

/// Decode a key-value export entry
pub fn decode_entry(entry: &RedisEntry) -> Result<Vec<u8>> {
    BASE64.decode(&entry.value).map_err(|e| Error::KeyRestore {
        key: entry.key.clone(),
        reason: format!("invalid base64 value: {}", e),
    })
}
