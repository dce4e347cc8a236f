//! backup-dr library
//!
//! Backup, restore and disaster-recovery drills for a PostgreSQL-backed
//! deployment with an optional Redis cache and object storage bucket.

pub mod config;
pub mod error;
pub mod managers;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{load_backup, load_drill, load_global, load_restore, GlobalConfig, ProcessEnv};
pub use error::{Error, Result};
pub use managers::backup::BackupOrchestrator;
pub use managers::drill::{DrillOutcome, DrillRunner};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::NotificationManager;
pub use managers::restore::{RestoreOrchestrator, Restorer};
pub use store::{FleetStore, SqliteFleetStore};
