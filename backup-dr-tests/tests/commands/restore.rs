//! Tests for the 'restore' command

use backup_dr::config::BackupSelector;
use backup_dr::error::Error;
use backup_dr::managers::backup::{BackupOrchestrator, BackupOutcome};
use backup_dr::managers::restore::RestoreOrchestrator;
use std::fs;
use std::sync::Arc;
use test_utils::{
    flip_bit, healthy_database, populated_cache, ConfigBuilder, DatabaseCall, MockDatabaseOps, MockExecutor,
    MockRedisOps, MockResponse, TARGET_DB, TARGET_REDIS,
};

fn backed_up(builder: &ConfigBuilder, cache: &MockRedisOps) -> BackupOutcome {
    BackupOrchestrator::new(
        builder.global(),
        builder.backup(),
        Arc::new(healthy_database()),
        Arc::new(cache.clone()),
    )
    .run()
    .unwrap()
}

fn orchestrator(
    builder: &ConfigBuilder,
    database: &MockDatabaseOps,
    cache: &MockRedisOps,
    executor: &MockExecutor,
) -> RestoreOrchestrator {
    RestoreOrchestrator::new(
        builder.global(),
        Arc::new(database.clone()),
        Arc::new(cache.clone()),
        Arc::new(executor.clone()),
    )
}

#[test]
fn test_restore_latest_into_target() {
    let builder = ConfigBuilder::minimal()
        .with_default_redis()
        .with_restore_target(TARGET_DB, Some(TARGET_REDIS));
    let cache = populated_cache();
    let outcome = backed_up(&builder, &cache);

    let database = healthy_database();
    let report = orchestrator(&builder, &database, &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap();

    assert_eq!(report.backup_id, outcome.backup_id);
    assert_eq!(report.keys_restored, 2);
    assert_eq!(report.tables, 3);
    assert_eq!(database.restored_into(TARGET_DB).unwrap(), b"PGDMP fixture dump");

    let restored = cache.entries(TARGET_REDIS);
    assert_eq!(restored.len(), 2);
    assert_eq!(restored["settings:tenant"].ttl_ms, -1);
    assert_eq!(restored["session:42"].ttl_ms, 60_000);
    assert_eq!(*cache.flush_count.lock().unwrap(), 1);
}

#[test]
fn test_restore_by_id_and_by_path() {
    let builder = ConfigBuilder::minimal().with_restore_target(TARGET_DB, None);
    let cache = MockRedisOps::new();
    let older = backed_up(&builder, &cache);
    let _newer = backed_up(&builder, &cache);

    let builder = builder.set("RESTORE_BACKUP_ID", &older.backup_id);
    let report = orchestrator(&builder, &healthy_database(), &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap();
    assert_eq!(report.backup_id, older.backup_id);

    let mut config = builder.restore();
    config.backup = BackupSelector::Path(older.directory.clone());
    let report = orchestrator(&builder, &healthy_database(), &cache, &MockExecutor::new())
        .run(&config)
        .unwrap();
    assert_eq!(report.backup_id, older.backup_id);
}

#[test]
fn test_encrypted_restore_roundtrip() {
    let builder = ConfigBuilder::minimal()
        .with_default_redis()
        .with_encryption("correct horse battery staple")
        .with_restore_target(TARGET_DB, Some(TARGET_REDIS));
    let cache = populated_cache();
    backed_up(&builder, &cache);

    let database = healthy_database();
    let report = orchestrator(&builder, &database, &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap();

    assert_eq!(report.keys_restored, 2);
    assert_eq!(database.restored_into(TARGET_DB).unwrap(), b"PGDMP fixture dump");
}

#[test]
fn test_flipped_bit_fails_before_any_target_is_touched() {
    let builder = ConfigBuilder::minimal()
        .with_default_redis()
        .with_restore_target(TARGET_DB, Some(TARGET_REDIS));
    let cache = populated_cache();
    let outcome = backed_up(&builder, &cache);
    flip_bit(&outcome.directory.join("database.dump"), 3).unwrap();

    let database = healthy_database();
    let err = orchestrator(&builder, &database, &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap_err();

    assert_eq!(err.step(), Some("verify integrity"));
    assert!(matches!(err.root(), Error::Integrity { file, .. } if file == "database.dump"));
    assert!(!database.restore_called());
    assert_eq!(*cache.flush_count.lock().unwrap(), 0);
}

#[test]
fn test_failing_key_aborts_restore() {
    let builder = ConfigBuilder::minimal()
        .with_default_redis()
        .with_restore_target(TARGET_DB, Some(TARGET_REDIS));
    let cache = populated_cache().with_failing_key("session:42");
    backed_up(&builder, &cache);

    let err = orchestrator(&builder, &healthy_database(), &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap_err();

    assert_eq!(err.step(), Some("restore key-value store"));
    assert!(matches!(err.root(), Error::KeyRestore { key, .. } if key == "session:42"));
    // Export is sorted, so the failing key is the first one attempted
    assert_eq!(*cache.restore_attempts.lock().unwrap(), vec!["session:42".to_string()]);
}

#[test]
fn test_schema_drift_lists_missing_migrations() {
    let builder = ConfigBuilder::minimal().with_restore_target(TARGET_DB, None);
    let cache = MockRedisOps::new();
    backed_up(&builder, &cache);

    let migrations = builder.temp_dir().join("migrations");
    fs::create_dir_all(migrations.join("0001_init")).unwrap();
    fs::create_dir_all(migrations.join("0002_orders")).unwrap();
    fs::write(migrations.join("migration_lock.toml"), "provider = \"postgresql\"").unwrap();

    let builder = builder.set("RESTORE_MIGRATIONS_DIR", &migrations.display().to_string());
    let database = healthy_database().with_answer("_prisma_migrations", &["0001_init"]);
    let err = orchestrator(&builder, &database, &cache, &MockExecutor::new())
        .run(&builder.restore())
        .unwrap_err();

    assert_eq!(err.step(), Some("check schema drift"));
    match err.root() {
        Error::SchemaDrift { missing, unexpected } => {
            assert_eq!(missing, &vec!["0002_orders".to_string()]);
            assert!(unexpected.is_empty());
        }
        other => panic!("expected schema drift, got {:?}", other),
    }
    assert!(database
        .get_calls()
        .iter()
        .any(|c| matches!(c, DatabaseCall::Query { url, .. } if url == TARGET_DB)));
}

#[test]
fn test_smoke_command_failure_is_reported() {
    let builder = ConfigBuilder::minimal()
        .with_restore_target(TARGET_DB, None)
        .set("RESTORE_SMOKE_COMMAND", "./bin/check-invoices");
    let cache = MockRedisOps::new();
    backed_up(&builder, &cache);

    let executor = MockExecutor::new().expect(
        "sh",
        MockResponse::Failure {
            stderr: "invoice totals differ".to_string(),
            exit_code: 3,
        },
    );
    let err = orchestrator(&builder, &healthy_database(), &cache, &executor)
        .run(&builder.restore())
        .unwrap_err();

    assert_eq!(err.step(), Some("smoke test"));
    assert!(matches!(err.root(), Error::SmokeTest(message) if message.contains("invoice totals differ")));
    let call = &executor.get_calls()[0];
    assert!(call.envs.contains(&("DATABASE_URL".to_string(), TARGET_DB.to_string())));
}

#[test]
fn test_missing_backup_is_not_found() {
    let builder = ConfigBuilder::minimal().with_restore_target(TARGET_DB, None);
    let err = orchestrator(&builder, &healthy_database(), &MockRedisOps::new(), &MockExecutor::new())
        .run(&builder.restore())
        .unwrap_err();

    assert_eq!(err.step(), Some("resolve backup"));
    assert!(matches!(err.root(), Error::NotFound(_)));
}
