//! Fluent API for building test configurations
//!
//! Settings are collected as environment variables and loaded through the
//! crate's own loaders, so every builder also exercises config parsing.

use crate::fixtures::{SOURCE_DB, SOURCE_REDIS};
use backup_dr::config::{
    self, BackupConfig, DrillConfig, GlobalConfig, RestoreConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    vars: HashMap<String, String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with only an output directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder = Self {
            temp_dir,
            vars: HashMap::new(),
        };
        let output = builder.temp_dir.path().join("backups");
        builder = builder.set("BACKUP_OUTPUT_DIR", &output.display().to_string());
        builder
    }

    /// Source database, instance id and a short command deadline
    pub fn minimal() -> Self {
        Self::new()
            .set("DATABASE_URL", SOURCE_DB)
            .set("INSTANCE_ID", "acme-prod")
            .set("BACKUP_COMMAND_TIMEOUT_SECS", "30")
    }

    /// Set an arbitrary variable
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn unset(mut self, key: &str) -> Self {
        self.vars.remove(key);
        self
    }

    pub fn with_redis(self, url: &str) -> Self {
        self.set("REDIS_URL", url)
    }

    /// Source key-value store at the fixture URL
    pub fn with_default_redis(self) -> Self {
        self.with_redis(SOURCE_REDIS)
    }

    pub fn with_encryption(self, passphrase: &str) -> Self {
        self.set("BACKUP_ENCRYPTION_KEY", passphrase)
    }

    pub fn with_retention(self, days: u32, keep_latest: usize) -> Self {
        self.set("BACKUP_RETENTION_DAYS", &days.to_string())
            .set("BACKUP_RETENTION_KEEP_LATEST", &keep_latest.to_string())
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.set("STORAGE_BUCKET", bucket)
    }

    /// Fleet store file inside the temp dir
    pub fn with_control_plane(self) -> Self {
        let path = self.control_plane_file();
        self.set("CONTROL_PLANE_DATABASE_URL", &format!("sqlite://{}", path.display()))
    }

    pub fn with_restore_target(self, database_url: &str, redis_url: Option<&str>) -> Self {
        let builder = self.set("RESTORE_DATABASE_URL", database_url);
        match redis_url {
            Some(url) => builder.set("RESTORE_REDIS_URL", url),
            None => builder,
        }
    }

    pub fn with_drill_target(self, database_url: &str) -> Self {
        self.set("DR_TARGET_DATABASE_URL", database_url)
    }

    pub fn with_plan(self, plan: &str) -> Self {
        self.set("DR_PLAN", plan)
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("backups")
    }

    pub fn control_plane_file(&self) -> PathBuf {
        self.temp_dir.path().join("fleet.db")
    }

    /// The collected variables
    pub fn env(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn global(&self) -> GlobalConfig {
        config::load_global(&self.vars).expect("global config should load")
    }

    pub fn backup(&self) -> BackupConfig {
        config::load_backup(&self.vars).expect("backup config should load")
    }

    pub fn restore(&self) -> RestoreConfig {
        config::load_restore(&self.vars).expect("restore config should load")
    }

    pub fn drill(&self) -> DrillConfig {
        config::load_drill(&self.vars).expect("drill config should load")
    }

    pub fn drill_restore(&self) -> RestoreConfig {
        config::load_drill_restore(&self.vars, &self.drill()).expect("drill restore config should load")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
