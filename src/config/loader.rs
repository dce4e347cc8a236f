use super::types::*;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Source of configuration values, keyed by environment variable name
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment (after loading `.env`, if present)
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl ProcessEnv {
    pub fn load() -> Self {
        // A missing .env file is not an error
        let _ = dotenvy::dotenv();
        Self
    }
}

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

/// Non-empty, trimmed value of a variable
fn var(env: &dyn EnvSource, name: &str) -> Option<String> {
    env.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(env: &dyn EnvSource, name: &'static str) -> Result<String> {
    var(env, name).ok_or(ConfigError::Missing(name))
}

fn parse_bool(env: &dyn EnvSource, name: &'static str, default: bool) -> Result<bool> {
    match var(env, name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn parse_number<T>(env: &dyn EnvSource, name: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(env, name) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
    }
}

/// Strip an optional `sqlite://` scheme from a control-plane URL
pub fn control_plane_path(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}

/// Load settings shared by every subcommand
pub fn load_global(env: &dyn EnvSource) -> Result<GlobalConfig> {
    let output_dir = var(env, "BACKUP_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./backups"));
    let output_dir = super::expand_tilde(&output_dir);

    let pointer_file = var(env, "BACKUP_POINTER_FILE")
        .map(|p| super::expand_tilde(&PathBuf::from(p)))
        .unwrap_or_else(|| default_pointer_file(&output_dir));

    let timeout_secs: u64 = parse_number(env, "BACKUP_COMMAND_TIMEOUT_SECS")?.unwrap_or(3600);
    if timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "BACKUP_COMMAND_TIMEOUT_SECS must be greater than zero".to_string(),
        ));
    }

    Ok(GlobalConfig {
        output_dir,
        encryption_passphrase: var(env, "BACKUP_ENCRYPTION_KEY"),
        pointer_file,
        command_timeout: Duration::from_secs(timeout_secs),
        instance_id: var(env, "INSTANCE_ID").unwrap_or_else(|| "default".to_string()),
        control_plane_url: var(env, "CONTROL_PLANE_DATABASE_URL"),
        allow_missing_sidecar: parse_bool(env, "BACKUP_ALLOW_MISSING_SIDECAR", false)?,
        log_level: var(env, "LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        log_directory: var(env, "LOG_DIRECTORY").map(PathBuf::from),
        log_max_files: parse_number(env, "LOG_MAX_FILES")?.unwrap_or(10),
    })
}

/// Load settings for a backup run
pub fn load_backup(env: &dyn EnvSource) -> Result<BackupConfig> {
    let database_url = required(env, "DATABASE_URL")?;

    let storage = match var(env, "STORAGE_BUCKET") {
        Some(bucket) => {
            let access_key_id = var(env, "STORAGE_ACCESS_KEY_ID");
            let secret_access_key = var(env, "STORAGE_SECRET_ACCESS_KEY");
            if access_key_id.is_some() != secret_access_key.is_some() {
                return Err(ConfigError::ValidationError(
                    "STORAGE_ACCESS_KEY_ID and STORAGE_SECRET_ACCESS_KEY must be set together"
                        .to_string(),
                ));
            }
            Some(StorageConfig {
                bucket,
                region: var(env, "STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: var(env, "STORAGE_ENDPOINT"),
                access_key_id,
                secret_access_key,
            })
        }
        None => None,
    };

    let days: u32 = parse_number(env, "BACKUP_RETENTION_DAYS")?.unwrap_or(14);

    Ok(BackupConfig {
        database_url,
        redis_url: var(env, "REDIS_URL"),
        include_redis: parse_bool(env, "BACKUP_INCLUDE_REDIS", true)?,
        include_storage: parse_bool(env, "BACKUP_INCLUDE_STORAGE", true)?,
        storage,
        retention: RetentionPolicy {
            days,
            keep_latest: parse_number(env, "BACKUP_RETENTION_KEEP_LATEST")?.unwrap_or(0),
        },
    })
}

/// Which backup restore and verify operate on
pub fn load_backup_selector(env: &dyn EnvSource) -> Result<BackupSelector> {
    let selector = match (var(env, "RESTORE_BACKUP_PATH"), var(env, "RESTORE_BACKUP_ID")) {
        (Some(path), _) => BackupSelector::Path(super::expand_tilde(&PathBuf::from(path))),
        (None, Some(id)) => {
            if id.contains('/') || id.contains('\\') || id == ".." {
                return Err(ConfigError::Invalid {
                    name: "RESTORE_BACKUP_ID",
                    value: id,
                    reason: "must be a directory name, not a path".to_string(),
                });
            }
            BackupSelector::Id(id)
        }
        (None, None) => BackupSelector::Latest,
    };
    Ok(selector)
}

/// Load settings for a restore run
pub fn load_restore(env: &dyn EnvSource) -> Result<RestoreConfig> {
    let database_url = var(env, "RESTORE_DATABASE_URL")
        .or_else(|| var(env, "DATABASE_URL"))
        .ok_or(ConfigError::Missing("RESTORE_DATABASE_URL"))?;
    let redis_url = var(env, "RESTORE_REDIS_URL").or_else(|| var(env, "REDIS_URL"));
    restore_settings(env, database_url, redis_url)
}

/// Restore settings for a drill, pointed at the drill's own target
pub fn load_drill_restore(env: &dyn EnvSource, drill: &DrillConfig) -> Result<RestoreConfig> {
    restore_settings(
        env,
        drill.target_database_url.clone(),
        drill.target_redis_url.clone(),
    )
}

fn restore_settings(
    env: &dyn EnvSource,
    database_url: String,
    redis_url: Option<String>,
) -> Result<RestoreConfig> {
    Ok(RestoreConfig {
        database_url,
        redis_url,
        backup: load_backup_selector(env)?,
        restore_redis: parse_bool(env, "RESTORE_REDIS", true)?,
        migrations_dir: var(env, "RESTORE_MIGRATIONS_DIR").map(PathBuf::from),
        migrations_query: var(env, "RESTORE_MIGRATIONS_QUERY")
            .unwrap_or_else(|| DEFAULT_MIGRATIONS_QUERY.to_string()),
        smoke_command: var(env, "RESTORE_SMOKE_COMMAND"),
    })
}

/// Load settings for a disaster-recovery drill
pub fn load_drill(env: &dyn EnvSource) -> Result<DrillConfig> {
    let control_plane_url = required(env, "CONTROL_PLANE_DATABASE_URL")?;
    let target_database_url = required(env, "DR_TARGET_DATABASE_URL")?;

    let plan = match var(env, "DR_PLAN") {
        Some(value) => Some(PlanTier::parse(&value).ok_or_else(|| ConfigError::Invalid {
            name: "DR_PLAN",
            value,
            reason: "expected starter, standard, pro or enterprise".to_string(),
        })?),
        None => None,
    };

    Ok(DrillConfig {
        control_plane_url,
        installation_id: var(env, "DR_INSTALLATION_ID"),
        plan,
        rpo_target_override: parse_number(env, "DR_RPO_TARGET_MINUTES")?,
        rto_target_override: parse_number(env, "DR_RTO_TARGET_MINUTES")?,
        target_database_url,
        target_redis_url: var(env, "DR_TARGET_REDIS_URL"),
        alert_webhook_url: var(env, "DR_ALERT_WEBHOOK_URL"),
    })
}
