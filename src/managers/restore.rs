//! Restore orchestration
//!
//! Integrity is checked before any target is touched. Encrypted artifacts
//! are decrypted into a temporary working directory that is removed when the
//! run ends, whatever the outcome.

use crate::config::{BackupSelector, ConfigError, GlobalConfig, RestoreConfig};
use crate::error::{Error, Result, StepContext};
use crate::managers::backup::{self, RedisExport, DATABASE_ARTIFACT, REDIS_ARTIFACT};
use crate::utils::command::CommandOptions;
use crate::utils::crypto::{self, EncryptionKey};
use crate::utils::manifest::{self, BackupManifest};
use crate::utils::{CommandExecutor, DatabaseOperations, KeyValueOperations};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{info, warn};

const TOTAL_STEPS: usize = 7;

const TABLE_COUNT_QUERY: &str =
    "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'";

/// Summary of a successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: String,
    /// Tables in the public schema after restore
    pub tables: u64,
    pub keys_restored: usize,
    pub elapsed: Duration,
}

/// Anything that can restore a backup into a target; the drill runner
/// depends on this rather than on the orchestrator directly
pub trait Restorer {
    fn restore(&self, config: &RestoreConfig) -> Result<RestoreReport>;
}

fn log_step(step: usize, message: &str) {
    info!("[restore {}/{}] {}", step, TOTAL_STEPS, message);
}

/// Ensure the external tools a restore needs are on PATH
pub fn check_required_tools(config: &RestoreConfig) -> Result<()> {
    let mut tools = vec!["pg_restore", "psql"];
    if config.restore_redis && config.redis_url.is_some() {
        tools.push("redis-cli");
    }
    for tool in tools {
        which::which(tool).map_err(|_| {
            ConfigError::ValidationError(format!("Required tool '{}' was not found on PATH", tool))
        })?;
    }
    Ok(())
}

/// Directory of the selected backup
pub fn resolve_backup_dir(global: &GlobalConfig, selector: &BackupSelector) -> Result<PathBuf> {
    let dir = match selector {
        BackupSelector::Path(path) => path.clone(),
        BackupSelector::Id(id) => global.backup_dir(id),
        BackupSelector::Latest => match backup::read_pointer_file(&global.pointer_file)? {
            Some(pointer) => PathBuf::from(pointer.path),
            None => {
                return Err(Error::NotFound(format!(
                    "No backup selected and no pointer file at {}; set RESTORE_BACKUP_PATH or RESTORE_BACKUP_ID",
                    global.pointer_file.display()
                )))
            }
        },
    };

    if !dir.is_dir() {
        return Err(Error::NotFound(format!("Backup directory {} does not exist", dir.display())));
    }
    Ok(dir)
}

/// Resolve and verify a backup without restoring it
pub fn verify_backup(global: &GlobalConfig, selector: &BackupSelector) -> Result<BackupManifest> {
    let dir = resolve_backup_dir(global, selector).step("resolve backup")?;
    manifest::verify_manifest_with(&dir, global.allow_missing_sidecar).step("verify integrity")
}

/// Migration names declared on disk: extension stripped, hidden and lock
/// files ignored
pub fn declared_migrations(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type()?.is_dir();
        let stem = if is_dir {
            name.clone()
        } else {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| name.clone())
        };
        let is_lock = path.extension().map(|e| e == "lock").unwrap_or(false) || stem.ends_with("_lock");
        if is_lock {
            continue;
        }
        names.insert(stem);
    }
    Ok(names)
}

/// Artifact locations after optional decryption
struct Workspace {
    files: HashMap<String, PathBuf>,
    _scratch: Option<TempDir>,
}

impl Workspace {
    fn artifact(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }
}

pub struct RestoreOrchestrator {
    global: GlobalConfig,
    database: Arc<dyn DatabaseOperations>,
    key_value: Arc<dyn KeyValueOperations>,
    executor: Arc<dyn CommandExecutor>,
}

impl RestoreOrchestrator {
    pub fn new(
        global: GlobalConfig,
        database: Arc<dyn DatabaseOperations>,
        key_value: Arc<dyn KeyValueOperations>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            global,
            database,
            key_value,
            executor,
        }
    }

    pub fn run(&self, config: &RestoreConfig) -> Result<RestoreReport> {
        let started = Instant::now();
        let timeout = self.global.command_timeout;

        log_step(1, "verifying backup integrity");
        let dir = resolve_backup_dir(&self.global, &config.backup).step("resolve backup")?;
        let manifest = manifest::verify_manifest_with(&dir, self.global.allow_missing_sidecar)
            .step("verify integrity")?;
        info!("Restoring backup {} from {}", manifest.id, dir.display());

        log_step(2, "preparing artifacts");
        let workspace = self.prepare(&dir, &manifest).step("decrypt artifacts")?;

        log_step(3, "restoring relational store");
        let dump = workspace.artifact(DATABASE_ARTIFACT).ok_or_else(|| {
            Error::NotFound(format!("Backup {} has no {}", manifest.id, DATABASE_ARTIFACT)).at_step("restore relational store")
        })?;
        self.database
            .restore(&config.database_url, dump, timeout)
            .step("restore relational store")?;

        let keys_restored = match (config.restore_redis, config.redis_url.as_deref(), workspace.artifact(REDIS_ARTIFACT)) {
            (true, Some(url), Some(export)) => {
                log_step(4, "restoring key-value store");
                self.restore_key_value(url, export).step("restore key-value store")?
            }
            (true, None, Some(_)) => {
                warn!("Backup contains a key-value export but no target URL is configured, skipping");
                0
            }
            _ => {
                log_step(4, "key-value restore skipped");
                0
            }
        };

        log_step(5, "checking schema drift");
        self.check_schema_drift(config).step("check schema drift")?;

        log_step(6, "running smoke tests");
        let tables = self.smoke_test(config, keys_restored).step("smoke test")?;

        let elapsed = started.elapsed();
        log_step(7, &format!("restore of {} finished in {:.1}s", manifest.id, elapsed.as_secs_f64()));

        Ok(RestoreReport {
            backup_id: manifest.id,
            tables,
            keys_restored,
            elapsed,
        })
    }

    /// Decrypt `.enc` artifacts into a scratch directory; plaintext ones are
    /// used in place
    fn prepare(&self, dir: &Path, manifest: &BackupManifest) -> Result<Workspace> {
        let needs_key = manifest.files.iter().any(|f| crypto::is_encrypted_name(&f.name));
        if !needs_key {
            let files = manifest
                .files
                .iter()
                .map(|f| (f.name.clone(), dir.join(&f.name)))
                .collect();
            return Ok(Workspace { files, _scratch: None });
        }

        let passphrase = self
            .global
            .encryption_passphrase
            .as_deref()
            .ok_or(ConfigError::Missing("BACKUP_ENCRYPTION_KEY"))?;
        let key = EncryptionKey::derive(passphrase);
        let scratch = tempfile::Builder::new().prefix("backup-dr-restore-").tempdir()?;

        let mut files = HashMap::new();
        for file in &manifest.files {
            let source = dir.join(&file.name);
            if crypto::is_encrypted_name(&file.name) {
                let plain = crypto::decrypt_file_to(&source, scratch.path(), &key)?;
                let name = plain
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                files.insert(name, plain);
            } else {
                files.insert(file.name.clone(), source);
            }
        }

        Ok(Workspace {
            files,
            _scratch: Some(scratch),
        })
    }

    /// FLUSHALL, then one RESTORE per entry; stops at the first failure
    fn restore_key_value(&self, url: &str, export_path: &Path) -> Result<usize> {
        let timeout = self.global.command_timeout;
        let export: RedisExport = serde_json::from_slice(&fs::read(export_path)?)?;

        self.key_value.flush_all(url, timeout)?;
        for entry in &export.keys {
            let payload = backup::decode_entry(entry)?;
            let ttl = if entry.ttl < 0 { 0 } else { entry.ttl };
            self.key_value.restore_key(url, &entry.key, ttl, &payload, timeout)?;
        }

        info!("Restored {} key(s)", export.keys.len());
        Ok(export.keys.len())
    }

    fn check_schema_drift(&self, config: &RestoreConfig) -> Result<()> {
        let Some(ref migrations_dir) = config.migrations_dir else {
            warn!("No migrations directory configured, skipping schema drift check");
            return Ok(());
        };

        let declared = declared_migrations(migrations_dir)?;
        let applied: BTreeSet<String> = self
            .database
            .query_lines(&config.database_url, &config.migrations_query, self.global.command_timeout)?
            .into_iter()
            .collect();

        let missing: Vec<String> = declared.difference(&applied).cloned().collect();
        let unexpected: Vec<String> = applied.difference(&declared).cloned().collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(Error::SchemaDrift { missing, unexpected });
        }

        info!("Schema matches {} declared migration(s)", declared.len());
        Ok(())
    }

    /// Returns the number of public tables
    fn smoke_test(&self, config: &RestoreConfig, keys_restored: usize) -> Result<u64> {
        let timeout = self.global.command_timeout;

        let ping = self.database.query_lines(&config.database_url, "SELECT 1", timeout)?;
        if ping.first().map(String::as_str) != Some("1") {
            return Err(Error::SmokeTest(format!("SELECT 1 returned {:?}", ping)));
        }

        let count = self.database.query_lines(&config.database_url, TABLE_COUNT_QUERY, timeout)?;
        let tables: u64 = count
            .first()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| Error::SmokeTest(format!("unreadable table count {:?}", count)))?;
        if tables == 0 {
            return Err(Error::SmokeTest("no tables in the public schema".to_string()));
        }

        if keys_restored > 0 {
            if let Some(ref url) = config.redis_url {
                let size = self.key_value.dbsize(url, timeout)?;
                if size < keys_restored as u64 {
                    return Err(Error::SmokeTest(format!(
                        "key-value store holds {} key(s), expected at least {}",
                        size, keys_restored
                    )));
                }
            }
        }

        if let Some(ref command) = config.smoke_command {
            let mut options = CommandOptions::new().env("DATABASE_URL", &config.database_url);
            if let Some(ref url) = config.redis_url {
                options = options.env("REDIS_URL", url);
            }
            self.executor
                .run_shell_command(command, &options, timeout)
                .map_err(|e| match e {
                    Error::ToolFailure { .. } => Error::SmokeTest(e.to_string()),
                    other => other,
                })?;
            info!("Smoke command passed");
        }

        Ok(tables)
    }
}

impl Restorer for RestoreOrchestrator {
    fn restore(&self, config: &RestoreConfig) -> Result<RestoreReport> {
        self.run(config)
    }
}
