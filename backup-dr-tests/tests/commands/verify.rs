//! Tests for the 'verify' command
//!
//! Verify resolves a backup the same way restore does and checks its
//! manifest without touching any target.

use backup_dr::config::{self, BackupSelector};
use backup_dr::error::Error;
use backup_dr::managers::backup::BackupOrchestrator;
use backup_dr::managers::restore::verify_backup;
use backup_dr::utils::manifest::SIDECAR_FILE;
use std::fs;
use std::sync::Arc;
use test_utils::{flip_bit, healthy_database, populated_cache, write_sealed_backup, ConfigBuilder, MockRedisOps};

#[test]
fn test_verify_latest_backup() {
    let builder = ConfigBuilder::minimal().with_default_redis();
    let outcome = BackupOrchestrator::new(
        builder.global(),
        builder.backup(),
        Arc::new(healthy_database()),
        Arc::new(populated_cache()),
    )
    .run()
    .unwrap();

    let selector = config::load_backup_selector(builder.env()).unwrap();
    assert_eq!(selector, BackupSelector::Latest);

    let manifest = verify_backup(&builder.global(), &selector).unwrap();
    assert_eq!(manifest, outcome.manifest);
}

#[test]
fn test_verify_by_id_detects_tampering() {
    let builder = ConfigBuilder::minimal();
    let outcome = BackupOrchestrator::new(
        builder.global(),
        builder.backup(),
        Arc::new(healthy_database()),
        Arc::new(MockRedisOps::new()),
    )
    .run()
    .unwrap();
    flip_bit(&outcome.directory.join("database.dump"), 0).unwrap();

    let err = verify_backup(&builder.global(), &BackupSelector::Id(outcome.backup_id.clone())).unwrap_err();
    assert_eq!(err.step(), Some("verify integrity"));
    assert!(matches!(err.root(), Error::Integrity { .. }));
}

#[test]
fn test_verify_without_sidecar_is_an_integrity_failure() {
    let builder = ConfigBuilder::minimal();
    let dir = builder.temp_dir().join("handmade");
    write_sealed_backup(&dir, "handmade", &[("database.dump", b"rows")]).unwrap();
    fs::remove_file(dir.join(SIDECAR_FILE)).unwrap();

    let err = verify_backup(&builder.global(), &BackupSelector::Path(dir)).unwrap_err();
    assert_eq!(err.step(), Some("verify integrity"));
    assert!(matches!(err.root(), Error::Integrity { file, .. } if file == SIDECAR_FILE));
}

#[test]
fn test_legacy_backup_without_sidecar_still_checks_files() {
    let builder = ConfigBuilder::minimal().set("BACKUP_ALLOW_MISSING_SIDECAR", "true");
    let dir = builder.temp_dir().join("handmade");
    write_sealed_backup(&dir, "handmade", &[("database.dump", b"rows")]).unwrap();
    fs::remove_file(dir.join(SIDECAR_FILE)).unwrap();

    let manifest = verify_backup(&builder.global(), &BackupSelector::Path(dir.clone())).unwrap();
    assert_eq!(manifest.id, "handmade");

    fs::write(dir.join("database.dump"), b"rowz").unwrap();
    assert!(verify_backup(&builder.global(), &BackupSelector::Path(dir)).is_err());
}

#[test]
fn test_verify_unknown_id_is_not_found() {
    let builder = ConfigBuilder::minimal();
    let err = verify_backup(&builder.global(), &BackupSelector::Id("20200101T000000000Z-deadbeef".to_string()))
        .unwrap_err();
    assert_eq!(err.step(), Some("resolve backup"));
    assert!(matches!(err.root(), Error::NotFound(_)));
}
