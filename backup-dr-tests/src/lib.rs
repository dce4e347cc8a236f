//! Test utilities for backup-dr
//!
//! This crate provides shared test utilities, mock implementations,
//! and helper functions for testing the backup-dr application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext, MockDatabaseOps};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::new();
//!     let builder = ConfigBuilder::minimal().with_redis("redis://cache:6379/0");
//!     let global = builder.global();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::TestContext;

// Re-export types from the main crate for convenience
pub use backup_dr::config::{
    BackupConfig, BackupSelector, DrillConfig, GlobalConfig, PlanTargets, PlanTier,
    RestoreConfig, RetentionPolicy,
};
pub use backup_dr::store::{Alert, BackupPointer, DrillRecord, DrillStatus, FleetStore, Installation};

// Re-export mock implementations from the main crate
pub use backup_dr::utils::clock::mock::FakeClock;
pub use backup_dr::utils::database_ops::mock::{DatabaseCall, MockDatabaseOps};
pub use backup_dr::utils::database_ops::DatabaseOperations;
pub use backup_dr::utils::executor::mock::{MockExecutor, MockResponse};
pub use backup_dr::utils::executor::CommandExecutor;
pub use backup_dr::utils::redis_ops::mock::MockRedisOps;
pub use backup_dr::utils::redis_ops::KeyValueOperations;
pub use backup_dr::utils::storage_ops::mock::MockObjectStorage;
pub use backup_dr::utils::storage_ops::ObjectStorageOperations;
