use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Root directory holding one subdirectory per backup
    pub output_dir: PathBuf,

    /// Passphrase used for artifact encryption (optional)
    pub encryption_passphrase: Option<String>,

    /// Location of the "last backup" pointer file
    pub pointer_file: PathBuf,

    /// Deadline applied to every external process
    pub command_timeout: Duration,

    /// Identifier of the instance being backed up
    pub instance_id: String,

    /// Fleet-management store (SQLite path), if configured
    pub control_plane_url: Option<String>,

    /// Accept backups without a `manifest.sha256` (written before sidecars existed)
    pub allow_missing_sidecar: bool,

    /// Logging configuration
    pub log_level: String,
    pub log_directory: Option<PathBuf>,
    pub log_max_files: u32,
}

impl GlobalConfig {
    /// Directory of a backup inside the output root
    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.output_dir.join(backup_id)
    }
}

/// Object storage connection settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Settings for a backup run
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub include_redis: bool,
    pub include_storage: bool,
    pub storage: Option<StorageConfig>,
    pub retention: RetentionPolicy,
}

impl BackupConfig {
    /// Key-value store URL when the export is enabled
    pub fn effective_redis_url(&self) -> Option<&str> {
        if self.include_redis {
            self.redis_url.as_deref()
        } else {
            None
        }
    }

    /// Storage settings when the metadata snapshot is enabled
    pub fn effective_storage(&self) -> Option<&StorageConfig> {
        if self.include_storage {
            self.storage.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days: u32,
    /// Newest directories kept regardless of age (0 = purely age-based)
    pub keep_latest: usize,
}

/// Which backup a restore should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSelector {
    Path(PathBuf),
    Id(String),
    /// Whatever the pointer file currently references
    Latest,
}

/// Settings for a restore run
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub backup: BackupSelector,
    pub restore_redis: bool,
    pub migrations_dir: Option<PathBuf>,
    pub migrations_query: String,
    pub smoke_command: Option<String>,
}

impl RestoreConfig {
    /// Same restore settings pointed at another target
    pub fn with_target(&self, database_url: &str, redis_url: Option<&str>) -> Self {
        Self {
            database_url: database_url.to_string(),
            redis_url: redis_url.map(String::from),
            restore_redis: self.restore_redis && redis_url.is_some(),
            ..self.clone()
        }
    }
}

/// Settings for a disaster-recovery drill
#[derive(Debug, Clone)]
pub struct DrillConfig {
    pub control_plane_url: String,
    pub installation_id: Option<String>,
    pub plan: Option<PlanTier>,
    pub rpo_target_override: Option<u32>,
    pub rto_target_override: Option<u32>,
    pub target_database_url: String,
    pub target_redis_url: Option<String>,
    pub alert_webhook_url: Option<String>,
}

/// Plan tier of an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Starter,
    #[default]
    Standard,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Parse a plan name; unknown names yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "starter" => Some(PlanTier::Starter),
            "standard" => Some(PlanTier::Standard),
            "pro" => Some(PlanTier::Pro),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Starter => "starter",
            PlanTier::Standard => "standard",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    /// Default RPO/RTO targets of the tier
    pub fn default_targets(&self) -> PlanTargets {
        let (rpo, rto) = match self {
            PlanTier::Starter => (1440, 480),
            PlanTier::Standard => (720, 240),
            PlanTier::Pro => (240, 120),
            PlanTier::Enterprise => (60, 60),
        };
        PlanTargets {
            rpo_target_minutes: rpo,
            rto_target_minutes: rto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTargets {
    pub rpo_target_minutes: u32,
    pub rto_target_minutes: u32,
}

impl PlanTargets {
    /// Replace either target with an override when present
    pub fn with_overrides(self, rpo: Option<u32>, rto: Option<u32>) -> Self {
        Self {
            rpo_target_minutes: rpo.unwrap_or(self.rpo_target_minutes),
            rto_target_minutes: rto.unwrap_or(self.rto_target_minutes),
        }
    }
}

/// Default pointer file location inside the output directory
pub fn default_pointer_file(output_dir: &Path) -> PathBuf {
    output_dir.join("last-backup.json")
}

pub const DEFAULT_MIGRATIONS_QUERY: &str =
    "SELECT migration_name FROM _prisma_migrations WHERE finished_at IS NOT NULL ORDER BY migration_name";
